//! Common types and utilities for `psys`.
//!
//! This crate provides the primitives shared by every other psys crate:
//!
//! - [`Addr`], [`ProcessId`] and [`ThreadId`] identifier types and the
//!   [`parse_number`] helper used by the operator CLIs.
//! - [`Handle`] and [`SharedHandle`], scoped wrappers around raw OS handles.
//! - [`ByteView`], a smart pointer over memory-mapped or in-memory binary
//!   data.
//! - [`SelfCell`] and [`AsSelf`] for self-referential owner/borrower pairs.
//! - [`Symbol`], the resolved-function value produced by the symbol
//!   engines.

#![warn(missing_docs)]

mod byteview;
mod cell;
mod handle;
mod types;

pub use byteview::*;
pub use cell::*;
pub use handle::*;
pub use types::*;
