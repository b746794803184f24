//! Capability interfaces onto the platform's debugging facilities.
//!
//! The engine, walker and symbol engine are written against the traits in
//! this module. On Windows x86-64 the exported implementations drive the
//! user-mode debugging interface and the debug-help library; every other
//! platform gets stubs that fail with [`DebugError::Unsupported`].

use psys_common::{Addr, ProcessId, ThreadId};

use crate::error::DebugError;
use crate::event::{ContinueStatus, DebugEvent};

#[cfg(all(windows, target_arch = "x86_64"))]
#[path = "windows.rs"]
mod imp;

#[cfg(not(all(windows, target_arch = "x86_64")))]
#[path = "unsupported.rs"]
mod imp;

pub use imp::{
    enable_debug_privilege, thread_context, DbghelpSymbolService, DbghelpUnwinder, DebugApiPort,
    ThreadContext,
};

/// The OS interface for attaching to processes and pumping debug events.
pub trait DebugPort {
    /// Attaches to the process and configures it to survive our exit.
    fn attach(&mut self, pid: ProcessId) -> Result<(), DebugError>;

    /// Detaches from a previously attached process.
    fn detach(&mut self, pid: ProcessId) -> Result<(), DebugError>;

    /// Blocks until the next debug event across all attached processes.
    fn wait_event(&mut self) -> Result<DebugEvent, DebugError>;

    /// Resumes the target after an event was dispatched.
    fn continue_event(
        &mut self,
        pid: ProcessId,
        tid: ThreadId,
        status: ContinueStatus,
    ) -> Result<(), DebugError>;
}

/// The register seed a stack walk advances frame by frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCursor {
    /// The program counter of the current frame.
    pub pc: Addr,
    /// The stack pointer of the current frame.
    pub sp: Addr,
    /// The frame pointer of the current frame.
    pub fp: Addr,
}

/// The OS unwind service stepping a [`FrameCursor`] through the stack.
pub trait Unwind {
    /// Advances the cursor by one frame.
    ///
    /// Returns `Ok(false)` when there are no more frames. The first call
    /// yields the innermost frame, seeded from the thread context.
    fn step(&mut self, cursor: &mut FrameCursor) -> Result<bool, DebugError>;
}
