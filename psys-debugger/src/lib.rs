//! User-mode debugging for native processes.
//!
//! This crate drives the operating system's debugging interface to attach
//! to live processes, observe their debug events, and introspect their
//! stacks:
//!
//! - [`DebugEngine`] attaches to targets and pumps debug events through an
//!   ordered [`DebugEventListener`] chain.
//! - [`ProcessTracker`] is the listener building the [`Process`] model of
//!   modules and threads, and signals when the debugger is ready.
//! - [`StackWalk`] unwinds a stopped thread frame by frame.
//! - [`SymbolEngine`] labels code addresses using the platform's in-memory
//!   symbolication service, with an optional fallback onto the embedded
//!   symbols of the module's on-disk image.
//!
//! The OS facilities are consumed through the capability traits in [`sys`];
//! on platforms without a debugging interface their constructors fail with
//! [`DebugError::Unsupported`].

#![warn(missing_docs)]

mod engine;
mod error;
mod event;
mod listener;
mod model;
mod symbols;
pub mod sys;
mod walker;

pub use engine::DebugEngine;
pub use error::DebugError;
pub use event::{
    ContinueStatus, DebugEvent, DllLoadedEvent, ExceptionEvent, ProcessCreatedEvent,
    ThreadCreatedEvent, EXCEPTION_BREAKPOINT,
};
pub use listener::{DebugEventListener, EventDumper};
pub use model::{Module, Process, ProcessTracker, Thread};
pub use symbols::{SourceLocation, SymbolEngine, SymbolService};
pub use walker::{StackFrame, StackWalk};
