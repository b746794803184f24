//! The `pstack` operator tool: attach to processes by PID and print a
//! stack trace for each of their threads.

use std::borrow::Cow;
use std::cell::RefCell;
use std::env;
use std::io::{self, Write};
use std::rc::Rc;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use psys_common::ProcessId;
use psys_debugger::sys::{self, DebugApiPort};
use psys_debugger::{
    DebugEngine, DebugError, EventDumper, Process, ProcessTracker, StackFrame, StackWalk,
    SymbolEngine, SymbolService, Thread,
};
use psys_demangle::try_demangle;

mod options;

use options::{Options, Parsed, UsageError};

/// Maps a workflow failure onto the tool's exit code: the native error
/// code for OS failures, -2 for everything expected.
fn exit_code_for(err: &DebugError) -> i32 {
    err.os_code().unwrap_or(-2)
}

/// One line to stderr, prefixed by the program name. Debug builds append
/// the error's internal representation for context.
fn report_error(program: &str, err: &DebugError) {
    if cfg!(debug_assertions) {
        eprintln!("{program}: {err} [{err:?}]");
    } else {
        eprintln!("{program}: {err}");
    }
}

fn program_name(argv0: Option<&str>) -> String {
    argv0
        .map(|arg| {
            std::path::Path::new(arg)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| arg.to_string())
        })
        .unwrap_or_else(|| "pstack".to_string())
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = program_name(args.first().map(String::as_str));

    let options = match options::parse(args.iter().skip(1)) {
        Ok(Parsed::Run(options)) => options,
        Ok(Parsed::Quit) => return 0,
        Err(UsageError(message)) => {
            eprintln!("{program}: {message}");
            return -1;
        }
    };

    // A failing PID must not stop the remaining PIDs; the last failure
    // decides the exit code.
    let mut last_code = 0i32;
    let banner = options.pids.len() > 1;

    for &pid in &options.pids {
        if banner {
            println!("\n---------- PROCESS {pid} ----------");
        }

        if let Err(err) = process_pid(pid, &options) {
            report_error(&program, &err);
            last_code = exit_code_for(&err);
        }
    }

    last_code
}

/// Attaches to one PID, pumps until the debugger is ready, and prints the
/// requested stack traces.
fn process_pid(pid: ProcessId, options: &Options) -> Result<(), DebugError> {
    if options.request_privileges {
        if let Err(err) = sys::enable_debug_privilege() {
            warn!(%pid, "debug privilege not acquired: {err}");
        }
    }

    let mut engine = DebugEngine::new(DebugApiPort::new()?);
    engine.add_listener(Rc::new(RefCell::new(EventDumper)));

    let tracker = Rc::new(RefCell::new(ProcessTracker::new()));
    engine.add_listener(tracker.clone());

    engine.attach(pid)?;

    // Pump debug events; the tracker builds the model and reports ready
    // once the initial breakpoint fires.
    while !tracker.borrow().is_ready() {
        if tracker.borrow().exit_code().is_some() {
            return Err(DebugError::TargetExited);
        }
        engine.wait_for_event()?;
    }

    {
        let tracker = tracker.borrow();
        let process = tracker
            .process()
            .ok_or(DebugError::MissingState("process"))?;

        let service = sys::DbghelpSymbolService::new(process.handle())?;
        let symbols = SymbolEngine::new(service).with_image_scan(options.scan_images);

        let stdout = io::stdout();
        let mut out = stdout.lock();

        if options.show_all_threads {
            for thread in process.threads() {
                print_stack_trace(&mut out, process, thread, &symbols, options)?;
            }
        } else {
            let thread = process
                .thread(process.active_thread())
                .ok_or(DebugError::MissingState("active thread"))?;
            print_stack_trace(&mut out, process, thread, &symbols, options)?;
        }
    }

    engine.detach(pid)?;
    Ok(())
}

/// Prints the header and every frame of one thread's call stack.
fn print_stack_trace<W: Write, S: SymbolService>(
    out: &mut W,
    process: &Process,
    thread: &Thread,
    symbols: &SymbolEngine<S>,
    options: &Options,
) -> Result<(), DebugError> {
    print_thread_header(out, thread, options);

    let context = sys::thread_context(thread.handle())?;
    thread.set_last_context(context.cursor());
    let unwinder = sys::DbghelpUnwinder::new(process.handle(), thread.handle(), &context)?;

    for frame in StackWalk::new(unwinder, context.cursor()) {
        print_frame(out, process, symbols, &frame?, options);
    }

    Ok(())
}

fn print_thread_header<W: Write>(out: &mut W, thread: &Thread, options: &Options) {
    let _ = writeln!(out, "\nCall stack (thread: {}):", thread.id());
    let _ = writeln!(
        out,
        "Module\t\tAddress{}",
        if options.show_frames { "\t\t\tFrame" } else { "" }
    );
}

/// Renders one frame line: module, PC, optional FP, best symbol, source.
fn print_frame<W: Write, S: SymbolService>(
    out: &mut W,
    process: &Process,
    symbols: &SymbolEngine<S>,
    frame: &StackFrame,
    options: &Options,
) {
    let module_name = process
        .module_at(frame.pc)
        .map(|module| module.name())
        .unwrap_or(Cow::Borrowed("(Unknown)"));

    let _ = write!(out, "{module_name:<15} {:016X}", frame.pc);

    if options.show_frames {
        let _ = write!(out, "\t{:016X}", frame.fp);
    }

    if let Some(symbol) = symbols.find_symbol(process, frame.pc) {
        let _ = write!(out, " - {}", try_demangle(symbol.name()));
        if symbol.code_offset() > 0 {
            let _ = write!(out, " [+0x{:X}]", symbol.code_offset());
        }
        if let Some(location) = symbols.find_line(frame.pc) {
            let _ = write!(out, " - {}:{}", location.file, location.line);
        }
    }

    let _ = writeln!(out);
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use psys_common::{Addr, Handle, SharedHandle, Symbol, ThreadId};
    use psys_debugger::Module;

    use similar_asserts::assert_eq;

    struct OneSymbolService {
        start: Addr,
        name: &'static str,
    }

    impl SymbolService for OneSymbolService {
        fn find_symbol(&self, addr: Addr) -> Result<Option<Symbol>, DebugError> {
            Ok(addr.offset_from(self.start).map(|code_offset| {
                Symbol::new(self.start, code_offset, self.name)
            }))
        }
    }

    fn null_handle() -> SharedHandle {
        unsafe { Handle::from_raw(std::ptr::null_mut()) }.into_shared()
    }

    fn kernel32_process() -> Process {
        let mut process = Process::new(ProcessId(1234), null_handle(), ThreadId(1));
        process.add_module(Module::new(
            Addr(0x7FFE1A200000),
            None,
            Some(PathBuf::from("kernel32.dll")),
        ));
        process
    }

    fn render(frame: StackFrame, options: &Options) -> String {
        let process = kernel32_process();
        let symbols = SymbolEngine::new(OneSymbolService {
            start: Addr(0x7FFE1A2B3C33),
            name: "BaseThreadInitThunk",
        });

        let mut out = Vec::new();
        print_frame(&mut out, &process, &symbols, &frame, options);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_frame_line_format() {
        let line = render(
            StackFrame {
                pc: Addr(0x7FFE1A2B3C40),
                fp: Addr(0x14FA30),
            },
            &Options::default(),
        );

        assert_eq!(
            line,
            "kernel32        00007FFE1A2B3C40 - BaseThreadInitThunk [+0xD]\n"
        );
    }

    #[test]
    fn test_frame_line_with_frame_pointer() {
        let options = Options {
            show_frames: true,
            ..Options::default()
        };
        let line = render(
            StackFrame {
                pc: Addr(0x7FFE1A2B3C33),
                fp: Addr(0x14FA30),
            },
            &options,
        );

        // An exact symbol start omits the displacement suffix.
        assert_eq!(
            line,
            "kernel32        00007FFE1A2B3C33\t000000000014FA30 - BaseThreadInitThunk\n"
        );
    }

    #[test]
    fn test_unknown_module() {
        let line = render(
            StackFrame {
                pc: Addr(0x1000),
                fp: Addr(0),
            },
            &Options::default(),
        );

        assert!(line.starts_with("(Unknown)       0000000000001000"));
    }

    #[test]
    fn test_thread_header_format() {
        let thread = Thread::new(ThreadId(4321), null_handle(), Addr(0), Addr(0));

        let mut out = Vec::new();
        print_thread_header(&mut out, &thread, &Options::default());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\nCall stack (thread: 4321):\nModule\t\tAddress\n"
        );

        let mut out = Vec::new();
        let options = Options {
            show_frames: true,
            ..Options::default()
        };
        print_thread_header(&mut out, &thread, &options);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\nCall stack (thread: 4321):\nModule\t\tAddress\t\t\tFrame\n"
        );
    }
}

