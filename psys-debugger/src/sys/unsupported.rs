//! Stub backend for platforms without a user-mode debugging interface.
//!
//! Every constructor fails with [`DebugError::Unsupported`] so the operator
//! tools report a clear error instead of half-working.

use psys_common::{Addr, ProcessId, SharedHandle, Symbol, ThreadId};

use crate::error::DebugError;
use crate::event::{ContinueStatus, DebugEvent};
use crate::symbols::{SourceLocation, SymbolService};
use crate::sys::{DebugPort, FrameCursor, Unwind};

/// The debug port; cannot be opened on this platform.
pub struct DebugApiPort {
    _private: (),
}

impl DebugApiPort {
    /// Always fails with [`DebugError::Unsupported`].
    pub fn new() -> Result<Self, DebugError> {
        Err(DebugError::Unsupported)
    }
}

impl DebugPort for DebugApiPort {
    fn attach(&mut self, _pid: ProcessId) -> Result<(), DebugError> {
        Err(DebugError::Unsupported)
    }

    fn detach(&mut self, _pid: ProcessId) -> Result<(), DebugError> {
        Err(DebugError::Unsupported)
    }

    fn wait_event(&mut self) -> Result<DebugEvent, DebugError> {
        Err(DebugError::Unsupported)
    }

    fn continue_event(
        &mut self,
        _pid: ProcessId,
        _tid: ThreadId,
        _status: ContinueStatus,
    ) -> Result<(), DebugError> {
        Err(DebugError::Unsupported)
    }
}

/// A thread's register context; cannot be captured on this platform.
pub struct ThreadContext {
    _private: (),
}

impl ThreadContext {
    /// The instruction pointer.
    pub fn pc(&self) -> Addr {
        Addr::NULL
    }

    /// The stack pointer.
    pub fn sp(&self) -> Addr {
        Addr::NULL
    }

    /// The frame pointer.
    pub fn fp(&self) -> Addr {
        Addr::NULL
    }

    /// The register seed for a stack walk.
    pub fn cursor(&self) -> FrameCursor {
        FrameCursor::default()
    }
}

/// Always fails with [`DebugError::Unsupported`].
pub fn thread_context(_thread: &SharedHandle) -> Result<ThreadContext, DebugError> {
    Err(DebugError::Unsupported)
}

/// The stack-unwind service; cannot be constructed on this platform.
pub struct DbghelpUnwinder {
    _private: (),
}

impl DbghelpUnwinder {
    /// Always fails with [`DebugError::Unsupported`].
    pub fn new(
        _process: &SharedHandle,
        _thread: &SharedHandle,
        _context: &ThreadContext,
    ) -> Result<Self, DebugError> {
        Err(DebugError::Unsupported)
    }
}

impl Unwind for DbghelpUnwinder {
    fn step(&mut self, _cursor: &mut FrameCursor) -> Result<bool, DebugError> {
        Err(DebugError::Unsupported)
    }
}

/// The in-memory symbolication service; cannot be constructed here.
pub struct DbghelpSymbolService {
    _private: (),
}

impl DbghelpSymbolService {
    /// Always fails with [`DebugError::Unsupported`].
    pub fn new(_process: &SharedHandle) -> Result<Self, DebugError> {
        Err(DebugError::Unsupported)
    }
}

impl SymbolService for DbghelpSymbolService {
    fn find_symbol(&self, _addr: Addr) -> Result<Option<Symbol>, DebugError> {
        Ok(None)
    }

    fn find_line(&self, _addr: Addr) -> Result<Option<SourceLocation>, DebugError> {
        Ok(None)
    }
}

/// Always fails with [`DebugError::Unsupported`].
pub fn enable_debug_privilege() -> Result<(), DebugError> {
    Err(DebugError::Unsupported)
}
