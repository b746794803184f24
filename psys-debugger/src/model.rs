//! The in-memory model of a debugged process.
//!
//! The model is built up by [`ProcessTracker`], a listener fed by the
//! debug-event pump, and queried by the workflows between pump iterations.
//! It is never observed while being mutated, so no locking is involved.

use std::borrow::Cow;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::warn;

use psys_common::{Addr, ProcessId, SharedHandle, ThreadId};
use psys_image::{ImageError, ImageModule};

use crate::sys::FrameCursor;

use crate::event::{
    DebugEvent, DllLoadedEvent, ExceptionEvent, ProcessCreatedEvent, ThreadCreatedEvent,
    EXCEPTION_BREAKPOINT,
};
use crate::listener::DebugEventListener;

/// A module loaded into the target process.
#[derive(Debug)]
pub struct Module {
    base: Addr,
    size: Option<u64>,
    path: Option<PathBuf>,
}

impl Module {
    /// Creates a module at its load base.
    pub fn new(base: Addr, size: Option<u64>, path: Option<PathBuf>) -> Self {
        Module { base, size, path }
    }

    /// The address the module is loaded at.
    pub fn base(&self) -> Addr {
        self.base
    }

    /// The size of the loaded image, when known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// The module's on-disk path, when the OS could name it.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// The short display name, derived from the file name.
    pub fn name(&self) -> Cow<'_, str> {
        match self.path.as_ref().and_then(|path| path.file_stem()) {
            Some(stem) => stem.to_string_lossy(),
            None => Cow::Borrowed("(Unknown)"),
        }
    }

    /// Whether the address falls within this module's declared bounds.
    ///
    /// Modules without a known size only check the base.
    pub fn contains(&self, addr: Addr) -> bool {
        match self.size {
            Some(size) => addr >= self.base && addr.get() - self.base.get() < size,
            None => addr >= self.base,
        }
    }

    /// Maps the module's on-disk image at its runtime base.
    ///
    /// The mapping is created fresh on every call and caches nothing; it is
    /// dropped with the returned value.
    pub fn load_image(&self) -> Result<ImageModule<'static>, ImageError> {
        let path = self
            .path
            .as_ref()
            .ok_or(ImageError::Malformed("module has no backing file"))?;
        ImageModule::open(path, Some(self.base))
    }
}

/// A thread of the target process.
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    handle: SharedHandle,
    start_address: Addr,
    local_base: Addr,
    last_context: Cell<Option<FrameCursor>>,
    exit_code: Option<u32>,
}

impl Thread {
    /// Creates a thread record.
    pub fn new(id: ThreadId, handle: SharedHandle, start_address: Addr, local_base: Addr) -> Self {
        Thread {
            id,
            handle,
            start_address,
            local_base,
            last_context: Cell::new(None),
            exit_code: None,
        }
    }

    /// The thread id.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// The thread handle.
    pub fn handle(&self) -> &SharedHandle {
        &self.handle
    }

    /// The thread's start address.
    pub fn start_address(&self) -> Addr {
        self.start_address
    }

    /// The thread-local storage base.
    pub fn local_base(&self) -> Addr {
        self.local_base
    }

    /// Records the registers read by the most recent context capture.
    pub fn set_last_context(&self, context: FrameCursor) {
        self.last_context.set(Some(context));
    }

    /// The most recently captured register context, if any.
    pub fn last_context(&self) -> Option<FrameCursor> {
        self.last_context.get()
    }

    /// The thread's exit code, set when the thread is retired.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }
}

/// A debugged process with its modules and threads.
#[derive(Debug)]
pub struct Process {
    id: ProcessId,
    handle: SharedHandle,
    modules: BTreeMap<Addr, Module>,
    threads: BTreeMap<ThreadId, Thread>,
    thread_exit_codes: BTreeMap<ThreadId, u32>,
    active_thread: ThreadId,
}

impl Process {
    /// Creates a process record with no modules or threads.
    pub fn new(id: ProcessId, handle: SharedHandle, active_thread: ThreadId) -> Self {
        Process {
            id,
            handle,
            modules: BTreeMap::new(),
            threads: BTreeMap::new(),
            thread_exit_codes: BTreeMap::new(),
            active_thread,
        }
    }

    /// The process id.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// The process handle, shared with the symbol engine.
    pub fn handle(&self) -> &SharedHandle {
        &self.handle
    }

    /// The id of the thread that was current at attach time.
    pub fn active_thread(&self) -> ThreadId {
        self.active_thread
    }

    /// Inserts a module; a duplicate base replaces the old entry.
    pub fn add_module(&mut self, module: Module) {
        if let Some(old) = self.modules.insert(module.base, module) {
            warn!(base = %old.base(), "duplicate module base replaced");
        }
    }

    /// Removes the module loaded at `base`.
    pub fn remove_module(&mut self, base: Addr) -> Option<Module> {
        self.modules.remove(&base)
    }

    /// Finds the module whose base is the greatest base at or below `pc`.
    ///
    /// The match is validated against the module's image size when the size
    /// is known.
    pub fn module_at(&self, pc: Addr) -> Option<&Module> {
        let (_, module) = self.modules.range(..=pc).next_back()?;
        module.contains(pc).then_some(module)
    }

    /// Iterates modules in base-address order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// Inserts a thread; a duplicate id replaces the old entry.
    pub fn add_thread(&mut self, thread: Thread) {
        if let Some(old) = self.threads.insert(thread.id, thread) {
            warn!(tid = %old.id(), "duplicate thread id replaced");
        }
    }

    /// Removes a thread by id, keeping its exit code queryable.
    ///
    /// The returned record carries the exit code as well, for callers that
    /// want the full thread.
    pub fn retire_thread(&mut self, tid: ThreadId, exit_code: u32) -> Option<Thread> {
        self.thread_exit_codes.insert(tid, exit_code);
        let mut thread = self.threads.remove(&tid)?;
        thread.exit_code = Some(exit_code);
        Some(thread)
    }

    /// The exit code of a thread that has already been retired.
    pub fn thread_exit_code(&self, tid: ThreadId) -> Option<u32> {
        self.thread_exit_codes.get(&tid).copied()
    }

    /// Looks up a thread by id.
    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    /// Iterates threads in id order.
    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }
}

/// The listener that builds the process model from the event stream.
///
/// After the process-create event and the initial first-chance breakpoint
/// have been observed, the model contains the process, its initial modules
/// and its main thread, and [`ProcessTracker::is_ready`] turns true. Later
/// breakpoints pass through to the target unhandled.
#[derive(Debug, Default)]
pub struct ProcessTracker {
    process: Option<Process>,
    ready: bool,
    exit_code: Option<u32>,
}

impl ProcessTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        ProcessTracker::default()
    }

    /// True once the initial breakpoint has been observed.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// The exit code, if the target exited while we were attached.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// The tracked process, if it is still alive.
    pub fn process(&self) -> Option<&Process> {
        self.process.as_ref()
    }
}

impl DebugEventListener for ProcessTracker {
    fn on_process_created(&mut self, event: &ProcessCreatedEvent) -> bool {
        let mut process = Process::new(event.pid, event.process_handle.clone(), event.tid);

        process.add_module(Module::new(event.image_base, None, event.image_path.clone()));
        process.add_thread(Thread::new(
            event.tid,
            event.thread_handle.clone(),
            event.start_address,
            event.local_base,
        ));

        self.process = Some(process);
        true
    }

    fn on_process_exited(&mut self, event: &DebugEvent, exit_code: u32) -> bool {
        let _ = event;
        self.exit_code = Some(exit_code);
        self.process = None;
        true
    }

    fn on_thread_created(&mut self, event: &ThreadCreatedEvent) -> bool {
        if let Some(process) = self.process.as_mut() {
            process.add_thread(Thread::new(
                event.tid,
                event.handle.clone(),
                event.start_address,
                event.local_base,
            ));
        }
        true
    }

    fn on_thread_exited(&mut self, event: &DebugEvent, exit_code: u32) -> bool {
        if let Some(process) = self.process.as_mut() {
            process.retire_thread(event.tid(), exit_code);
        }
        true
    }

    fn on_dll_loaded(&mut self, event: &DllLoadedEvent) -> bool {
        if let Some(process) = self.process.as_mut() {
            process.add_module(Module::new(event.base, None, event.path.clone()));
        }
        true
    }

    fn on_dll_unloaded(&mut self, event: &DebugEvent) -> bool {
        if let (Some(process), DebugEvent::DllUnloaded { base, .. }) =
            (self.process.as_mut(), event)
        {
            process.remove_module(*base);
        }
        true
    }

    fn on_exception(&mut self, event: &ExceptionEvent) -> bool {
        if !self.ready && event.first_chance && event.code == EXCEPTION_BREAKPOINT {
            // The attach breakpoint: everything loaded before first
            // execution is now in the model.
            self.ready = true;
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn null_handle() -> SharedHandle {
        unsafe { psys_common::Handle::from_raw(std::ptr::null_mut()) }.into_shared()
    }

    fn process_with_modules(bases: &[(u64, Option<u64>)]) -> Process {
        let mut process = Process::new(ProcessId(7), null_handle(), ThreadId(8));
        for &(base, size) in bases {
            process.add_module(Module::new(Addr(base), size, None));
        }
        process
    }

    #[test]
    fn test_module_lower_bound() {
        let process = process_with_modules(&[(0x1000, None), (0x5000, None), (0x9000, None)]);

        assert_eq!(process.module_at(Addr(0x5000)).unwrap().base(), Addr(0x5000));
        assert_eq!(process.module_at(Addr(0x8FFF)).unwrap().base(), Addr(0x5000));
        assert_eq!(process.module_at(Addr(0xFFFF)).unwrap().base(), Addr(0x9000));
        assert!(process.module_at(Addr(0xFFF)).is_none());
    }

    #[test]
    fn test_module_size_bound() {
        let process = process_with_modules(&[(0x1000, Some(0x2000))]);

        assert!(process.module_at(Addr(0x2FFF)).is_some());
        assert!(process.module_at(Addr(0x3000)).is_none());
    }

    #[test]
    fn test_thread_context_and_exit_code() {
        let mut process = Process::new(ProcessId(7), null_handle(), ThreadId(8));
        process.add_thread(Thread::new(ThreadId(8), null_handle(), Addr(0x1000), Addr(0x7000)));

        let thread = process.thread(ThreadId(8)).unwrap();
        assert_eq!(thread.last_context(), None);
        assert_eq!(thread.exit_code(), None);

        let registers = FrameCursor {
            pc: Addr(0x401000),
            sp: Addr(0x9000),
            fp: Addr(0x8000),
        };
        thread.set_last_context(registers);
        assert_eq!(thread.last_context(), Some(registers));

        let retired = process.retire_thread(ThreadId(8), 3).unwrap();
        assert_eq!(retired.exit_code(), Some(3));
        assert_eq!(retired.last_context(), Some(registers));
        assert_eq!(process.thread_exit_code(ThreadId(8)), Some(3));
    }

    #[test]
    fn test_module_name_from_path() {
        let module = Module::new(
            Addr(0x7FFE1A200000),
            None,
            Some(PathBuf::from("C:\\Windows\\System32\\kernel32.dll")),
        );
        // Backslashes are path separators only on Windows hosts; the stem
        // still ends in the module name on every platform.
        assert!(module.name().ends_with("kernel32"));

        let unnamed = Module::new(Addr(0x1000), None, None);
        assert_eq!(unnamed.name(), "(Unknown)");
    }

    #[test]
    fn test_tracker_builds_model() {
        let mut tracker = ProcessTracker::new();

        assert!(tracker.handle_event(&DebugEvent::ProcessCreated(ProcessCreatedEvent {
            pid: ProcessId(42),
            tid: ThreadId(1),
            process_handle: null_handle(),
            thread_handle: null_handle(),
            image_base: Addr(0x400000),
            image_path: Some(PathBuf::from("target.exe")),
            start_address: Addr(0x401000),
            local_base: Addr(0x7000),
        })));

        tracker.handle_event(&DebugEvent::DllLoaded(DllLoadedEvent {
            pid: ProcessId(42),
            tid: ThreadId(1),
            base: Addr(0x7FFE1A200000),
            path: Some(PathBuf::from("kernel32.dll")),
        }));

        tracker.handle_event(&DebugEvent::ThreadCreated(ThreadCreatedEvent {
            pid: ProcessId(42),
            tid: ThreadId(2),
            handle: null_handle(),
            start_address: Addr(0x402000),
            local_base: Addr(0x8000),
        }));

        assert!(!tracker.is_ready());

        // The initial breakpoint is handled and flips readiness.
        assert!(tracker.handle_event(&DebugEvent::Exception(ExceptionEvent {
            pid: ProcessId(42),
            tid: ThreadId(1),
            code: EXCEPTION_BREAKPOINT,
            address: Addr(0x7FFE1A201000),
            first_chance: true,
        })));
        assert!(tracker.is_ready());

        // Later breakpoints pass through unhandled.
        assert!(!tracker.handle_event(&DebugEvent::Exception(ExceptionEvent {
            pid: ProcessId(42),
            tid: ThreadId(1),
            code: EXCEPTION_BREAKPOINT,
            address: Addr(0x7FFE1A201000),
            first_chance: true,
        })));

        let process = tracker.process().unwrap();
        assert_eq!(process.id(), ProcessId(42));
        assert_eq!(process.active_thread(), ThreadId(1));
        assert_eq!(process.threads().count(), 2);
        assert_eq!(process.modules().count(), 2);

        let module = process.module_at(Addr(0x7FFE1A201234)).unwrap();
        assert_eq!(module.base(), Addr(0x7FFE1A200000));
    }

    #[test]
    fn test_tracker_thread_and_module_removal() {
        let mut tracker = ProcessTracker::new();

        tracker.handle_event(&DebugEvent::ProcessCreated(ProcessCreatedEvent {
            pid: ProcessId(42),
            tid: ThreadId(1),
            process_handle: null_handle(),
            thread_handle: null_handle(),
            image_base: Addr(0x400000),
            image_path: None,
            start_address: Addr(0x401000),
            local_base: Addr(0x7000),
        }));

        tracker.handle_event(&DebugEvent::DllLoaded(DllLoadedEvent {
            pid: ProcessId(42),
            tid: ThreadId(1),
            base: Addr(0x500000),
            path: None,
        }));
        tracker.handle_event(&DebugEvent::DllUnloaded {
            pid: ProcessId(42),
            tid: ThreadId(1),
            base: Addr(0x500000),
        });

        tracker.handle_event(&DebugEvent::ThreadExited {
            pid: ProcessId(42),
            tid: ThreadId(1),
            exit_code: 9,
        });

        let process = tracker.process().unwrap();
        assert_eq!(process.modules().count(), 1);
        assert_eq!(process.threads().count(), 0);
        assert_eq!(process.thread_exit_code(ThreadId(1)), Some(9));
        assert_eq!(process.thread_exit_code(ThreadId(2)), None);

        tracker.handle_event(&DebugEvent::ProcessExited {
            pid: ProcessId(42),
            tid: ThreadId(1),
            exit_code: 3,
        });
        assert!(tracker.process().is_none());
        assert_eq!(tracker.exit_code(), Some(3));
    }
}
