//! The debug-event loop: attach, pump, dispatch, continue.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use psys_common::ProcessId;

use crate::error::DebugError;
use crate::event::{ContinueStatus, DebugEvent};
use crate::listener::DebugEventListener;
use crate::sys::{self, DebugPort};

/// Drives the OS debugging interface for one or more target processes.
///
/// The engine owns the debug port and an ordered chain of listeners. One
/// call to [`wait_for_event`] blocks for the next event across all attached
/// processes, delivers it to every listener in order, OR-combines their
/// results into the continuation status, and resumes the target.
///
/// Attachments are scoped: any process still attached when the engine is
/// dropped is detached, on error paths included.
///
/// [`wait_for_event`]: DebugEngine::wait_for_event
pub struct DebugEngine<P: DebugPort> {
    port: P,
    listeners: Vec<Rc<RefCell<dyn DebugEventListener>>>,
    attached: Vec<ProcessId>,
}

impl<P: DebugPort> DebugEngine<P> {
    /// Creates an engine over the given debug port.
    ///
    /// Debugging system processes needs an elevated privilege; acquiring it
    /// is attempted here and failure is not fatal.
    pub fn new(port: P) -> Self {
        if let Err(err) = sys::enable_debug_privilege() {
            debug!("debug privilege not acquired: {err}");
        }

        DebugEngine {
            port,
            listeners: Vec::new(),
            attached: Vec::new(),
        }
    }

    /// Appends a listener to the dispatch chain.
    ///
    /// The caller keeps its own reference to query the listener between
    /// pump iterations.
    pub fn add_listener(&mut self, listener: Rc<RefCell<dyn DebugEventListener>>) {
        self.listeners.push(listener);
    }

    /// Attaches to a process and records the attachment.
    pub fn attach(&mut self, pid: ProcessId) -> Result<(), DebugError> {
        self.port.attach(pid)?;
        self.attached.push(pid);
        debug!(%pid, "attached");
        Ok(())
    }

    /// Detaches from a process, resuming it.
    pub fn detach(&mut self, pid: ProcessId) -> Result<(), DebugError> {
        self.attached.retain(|&attached| attached != pid);
        self.port.detach(pid)?;
        debug!(%pid, "detached");
        Ok(())
    }

    /// The processes currently attached.
    pub fn attached(&self) -> &[ProcessId] {
        &self.attached
    }

    /// Pumps one debug event through the listener chain.
    ///
    /// Blocks until an event arrives, dispatches it, then continues the
    /// target with the combined handled status.
    pub fn wait_for_event(&mut self) -> Result<(), DebugError> {
        let event = self.port.wait_event()?;

        let mut handled = false;
        for listener in &self.listeners {
            handled |= listener.borrow_mut().handle_event(&event);
        }

        let status = ContinueStatus::from_handled(handled);
        let (pid, tid) = (event.pid(), event.tid());
        self.port.continue_event(pid, tid, status)?;

        // Exiting processes end their attachment; nothing left to detach.
        if let DebugEvent::ProcessExited { pid, .. } = event {
            self.attached.retain(|&attached| attached != pid);
        }

        Ok(())
    }
}

impl<P: DebugPort> Drop for DebugEngine<P> {
    fn drop(&mut self) {
        for pid in std::mem::take(&mut self.attached) {
            if let Err(err) = self.port.detach(pid) {
                warn!(%pid, "detach on teardown failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use psys_common::{Addr, ThreadId};

    use crate::event::ExceptionEvent;
    use crate::event::EXCEPTION_BREAKPOINT;
    use crate::model::ProcessTracker;

    use similar_asserts::assert_eq;

    #[derive(Default)]
    struct MockPort {
        events: VecDeque<DebugEvent>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl MockPort {
        fn record(&self, entry: String) {
            self.log.borrow_mut().push(entry);
        }
    }

    impl DebugPort for MockPort {
        fn attach(&mut self, pid: ProcessId) -> Result<(), DebugError> {
            self.record(format!("attach {pid}"));
            Ok(())
        }

        fn detach(&mut self, pid: ProcessId) -> Result<(), DebugError> {
            self.record(format!("detach {pid}"));
            Ok(())
        }

        fn wait_event(&mut self) -> Result<DebugEvent, DebugError> {
            self.events
                .pop_front()
                .ok_or(DebugError::MissingState("event"))
        }

        fn continue_event(
            &mut self,
            pid: ProcessId,
            _tid: ThreadId,
            status: ContinueStatus,
        ) -> Result<(), DebugError> {
            self.record(format!("continue {pid} {status:?}"));
            Ok(())
        }
    }

    fn breakpoint(pid: u32) -> DebugEvent {
        DebugEvent::Exception(ExceptionEvent {
            pid: ProcessId(pid),
            tid: ThreadId(1),
            code: EXCEPTION_BREAKPOINT,
            address: Addr(0x1000),
            first_chance: true,
        })
    }

    #[test]
    fn test_dispatch_combines_handled() {
        let mut port = MockPort::default();
        port.events.push_back(breakpoint(42));
        port.events.push_back(breakpoint(42));

        let mut engine = DebugEngine::new(port);
        let tracker = Rc::new(RefCell::new(ProcessTracker::new()));
        engine.add_listener(tracker.clone());

        // The first breakpoint is handled by the tracker; the second is not.
        engine.wait_for_event().unwrap();
        engine.wait_for_event().unwrap();

        assert_eq!(
            *engine.port.log.borrow(),
            vec![
                "continue 42 Handled".to_string(),
                "continue 42 Unhandled".to_string(),
            ]
        );
        assert!(tracker.borrow().is_ready());
    }

    #[test]
    fn test_detach_on_drop() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let port = MockPort {
                events: VecDeque::new(),
                log: log.clone(),
            };
            let mut engine = DebugEngine::new(port);
            engine.attach(ProcessId(7)).unwrap();
            engine.attach(ProcessId(8)).unwrap();
            engine.detach(ProcessId(7)).unwrap();
        }

        // The still-attached pid is released when the engine goes away.
        assert_eq!(
            *log.borrow(),
            vec!["attach 7", "attach 8", "detach 7", "detach 8"]
        );
    }

    #[test]
    fn test_process_exit_ends_attachment() {
        let mut port = MockPort::default();
        port.events.push_back(DebugEvent::ProcessExited {
            pid: ProcessId(42),
            tid: ThreadId(1),
            exit_code: 0,
        });

        let mut engine = DebugEngine::new(port);
        engine.attach(ProcessId(42)).unwrap();
        engine.wait_for_event().unwrap();

        assert!(engine.attached().is_empty());
    }
}
