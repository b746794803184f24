//! Decoded debug events as delivered by the event pump.

use std::path::PathBuf;

use psys_common::{Addr, ProcessId, SharedHandle, ThreadId};

/// The exception code of a debugger breakpoint.
pub const EXCEPTION_BREAKPOINT: u32 = 0x8000_0003;

/// The continuation status handed back to the OS after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContinueStatus {
    /// The event was handled; execution continues normally.
    Handled,
    /// The event was not handled; exceptions propagate to the target.
    Unhandled,
}

impl ContinueStatus {
    /// Derives the status from the OR-combined listener results.
    pub fn from_handled(handled: bool) -> Self {
        if handled {
            ContinueStatus::Handled
        } else {
            ContinueStatus::Unhandled
        }
    }
}

/// Payload of a process-create event.
///
/// Carries the handles the OS delivered for the new process and its main
/// thread. They are shared because the model and the symbol engine hold
/// them jointly for the lifetime of the attachment.
#[derive(Debug)]
pub struct ProcessCreatedEvent {
    /// The id of the new process.
    pub pid: ProcessId,
    /// The id of the process's main thread.
    pub tid: ThreadId,
    /// The process handle.
    pub process_handle: SharedHandle,
    /// The main thread's handle.
    pub thread_handle: SharedHandle,
    /// The base address of the executable image.
    pub image_base: Addr,
    /// The executable's path, when the OS could name it.
    pub image_path: Option<PathBuf>,
    /// The thread's start address.
    pub start_address: Addr,
    /// The thread-local storage base.
    pub local_base: Addr,
}

/// Payload of a thread-create event.
#[derive(Debug)]
pub struct ThreadCreatedEvent {
    /// The owning process.
    pub pid: ProcessId,
    /// The id of the new thread.
    pub tid: ThreadId,
    /// The thread's handle.
    pub handle: SharedHandle,
    /// The thread's start address.
    pub start_address: Addr,
    /// The thread-local storage base.
    pub local_base: Addr,
}

/// Payload of a module-load event.
#[derive(Debug)]
pub struct DllLoadedEvent {
    /// The owning process.
    pub pid: ProcessId,
    /// The thread that was current when the event fired.
    pub tid: ThreadId,
    /// The address the module was loaded at.
    pub base: Addr,
    /// The module's path, when the OS could name it.
    pub path: Option<PathBuf>,
}

/// Payload of an exception event.
#[derive(Debug)]
pub struct ExceptionEvent {
    /// The owning process.
    pub pid: ProcessId,
    /// The faulting thread.
    pub tid: ThreadId,
    /// The OS exception code.
    pub code: u32,
    /// The faulting address.
    pub address: Addr,
    /// Whether this is the first delivery of the exception.
    pub first_chance: bool,
}

/// A debug event, decoded into its model-facing payload.
#[derive(Debug)]
pub enum DebugEvent {
    /// A process was created or attached to.
    ProcessCreated(ProcessCreatedEvent),
    /// A process exited.
    ProcessExited {
        /// The exiting process.
        pid: ProcessId,
        /// The reporting thread.
        tid: ThreadId,
        /// The process exit code.
        exit_code: u32,
    },
    /// A thread was created.
    ThreadCreated(ThreadCreatedEvent),
    /// A thread exited.
    ThreadExited {
        /// The owning process.
        pid: ProcessId,
        /// The exiting thread.
        tid: ThreadId,
        /// The thread exit code.
        exit_code: u32,
    },
    /// A module was loaded.
    DllLoaded(DllLoadedEvent),
    /// A module was unloaded.
    DllUnloaded {
        /// The owning process.
        pid: ProcessId,
        /// The reporting thread.
        tid: ThreadId,
        /// The base the module was loaded at.
        base: Addr,
    },
    /// The target raised an exception.
    Exception(ExceptionEvent),
    /// The target wrote a debug string.
    DebugString {
        /// The owning process.
        pid: ProcessId,
        /// The reporting thread.
        tid: ThreadId,
        /// The message, lossily decoded.
        message: String,
    },
    /// A RIP (system debugging error) event.
    Rip {
        /// The owning process.
        pid: ProcessId,
        /// The reporting thread.
        tid: ThreadId,
        /// The error that caused the event.
        error: u32,
    },
}

impl DebugEvent {
    /// The process the event belongs to.
    pub fn pid(&self) -> ProcessId {
        match *self {
            DebugEvent::ProcessCreated(ref event) => event.pid,
            DebugEvent::ProcessExited { pid, .. } => pid,
            DebugEvent::ThreadCreated(ref event) => event.pid,
            DebugEvent::ThreadExited { pid, .. } => pid,
            DebugEvent::DllLoaded(ref event) => event.pid,
            DebugEvent::DllUnloaded { pid, .. } => pid,
            DebugEvent::Exception(ref event) => event.pid,
            DebugEvent::DebugString { pid, .. } => pid,
            DebugEvent::Rip { pid, .. } => pid,
        }
    }

    /// The thread that was current when the event fired.
    pub fn tid(&self) -> ThreadId {
        match *self {
            DebugEvent::ProcessCreated(ref event) => event.tid,
            DebugEvent::ProcessExited { tid, .. } => tid,
            DebugEvent::ThreadCreated(ref event) => event.tid,
            DebugEvent::ThreadExited { tid, .. } => tid,
            DebugEvent::DllLoaded(ref event) => event.tid,
            DebugEvent::DllUnloaded { tid, .. } => tid,
            DebugEvent::Exception(ref event) => event.tid,
            DebugEvent::DebugString { tid, .. } => tid,
            DebugEvent::Rip { tid, .. } => tid,
        }
    }
}
