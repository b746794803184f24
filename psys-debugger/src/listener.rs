//! The listener chain that observes debug events.

use tracing::debug;

use crate::event::{
    DebugEvent, DllLoadedEvent, ExceptionEvent, ProcessCreatedEvent, ThreadCreatedEvent,
};

/// A subscriber to debug events.
///
/// The engine delivers every event to every listener, in registration
/// order. Each callback returns a continuation hint: `true` marks the event
/// as handled. The per-event results are OR-combined into the status used
/// to continue the target. Callbacks run synchronously with the pump and
/// may mutate shared state freely, but must not block indefinitely.
#[allow(unused_variables)]
pub trait DebugEventListener {
    /// A process was created or attached to.
    fn on_process_created(&mut self, event: &ProcessCreatedEvent) -> bool {
        false
    }

    /// A process exited.
    fn on_process_exited(&mut self, event: &DebugEvent, exit_code: u32) -> bool {
        false
    }

    /// A thread was created.
    fn on_thread_created(&mut self, event: &ThreadCreatedEvent) -> bool {
        false
    }

    /// A thread exited.
    fn on_thread_exited(&mut self, event: &DebugEvent, exit_code: u32) -> bool {
        false
    }

    /// A module was loaded.
    fn on_dll_loaded(&mut self, event: &DllLoadedEvent) -> bool {
        false
    }

    /// A module was unloaded.
    fn on_dll_unloaded(&mut self, event: &DebugEvent) -> bool {
        false
    }

    /// The target raised an exception.
    fn on_exception(&mut self, event: &ExceptionEvent) -> bool {
        false
    }

    /// The target wrote a debug string.
    fn on_debug_string(&mut self, event: &DebugEvent, message: &str) -> bool {
        false
    }

    /// A RIP event was reported.
    fn on_rip(&mut self, event: &DebugEvent, error: u32) -> bool {
        false
    }

    /// Dispatches an event to the matching callback.
    fn handle_event(&mut self, event: &DebugEvent) -> bool {
        match *event {
            DebugEvent::ProcessCreated(ref payload) => self.on_process_created(payload),
            DebugEvent::ProcessExited { exit_code, .. } => {
                self.on_process_exited(event, exit_code)
            }
            DebugEvent::ThreadCreated(ref payload) => self.on_thread_created(payload),
            DebugEvent::ThreadExited { exit_code, .. } => self.on_thread_exited(event, exit_code),
            DebugEvent::DllLoaded(ref payload) => self.on_dll_loaded(payload),
            DebugEvent::DllUnloaded { .. } => self.on_dll_unloaded(event),
            DebugEvent::Exception(ref payload) => self.on_exception(payload),
            DebugEvent::DebugString { ref message, .. } => self.on_debug_string(event, message),
            DebugEvent::Rip { error, .. } => self.on_rip(event, error),
        }
    }
}

/// A listener that logs every event and handles none of them.
///
/// Installed by the stack printer so that a trace-level run shows the raw
/// event stream the model was built from.
#[derive(Debug, Default)]
pub struct EventDumper;

impl DebugEventListener for EventDumper {
    fn handle_event(&mut self, event: &DebugEvent) -> bool {
        match *event {
            DebugEvent::ProcessCreated(ref payload) => debug!(
                pid = %payload.pid,
                tid = %payload.tid,
                base = %payload.image_base,
                path = ?payload.image_path,
                "process created"
            ),
            DebugEvent::ProcessExited { pid, exit_code, .. } => {
                debug!(%pid, exit_code, "process exited")
            }
            DebugEvent::ThreadCreated(ref payload) => debug!(
                pid = %payload.pid,
                tid = %payload.tid,
                start = %payload.start_address,
                "thread created"
            ),
            DebugEvent::ThreadExited { tid, exit_code, .. } => {
                debug!(%tid, exit_code, "thread exited")
            }
            DebugEvent::DllLoaded(ref payload) => debug!(
                pid = %payload.pid,
                base = %payload.base,
                path = ?payload.path,
                "dll loaded"
            ),
            DebugEvent::DllUnloaded { base, .. } => debug!(%base, "dll unloaded"),
            DebugEvent::Exception(ref payload) => debug!(
                tid = %payload.tid,
                code = %format_args!("0x{:08X}", payload.code),
                address = %payload.address,
                first_chance = payload.first_chance,
                "exception"
            ),
            DebugEvent::DebugString { ref message, .. } => debug!(%message, "debug string"),
            DebugEvent::Rip { error, .. } => debug!(error, "rip event"),
        }

        false
    }
}
