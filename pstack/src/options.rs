//! Command-line parsing for `pstack`.

use std::fmt;

use psys_common::{parse_number, ProcessId};

/// A command line that failed to parse.
#[derive(Debug, PartialEq, Eq)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

/// The parsed command line.
#[derive(Debug, PartialEq, Eq)]
pub struct Options {
    /// Walk every thread of the target (`/A`, the default) instead of only
    /// the active one (`/O`).
    pub show_all_threads: bool,
    /// Include the frame-pointer column (`/F`).
    pub show_frames: bool,
    /// Scan the on-disk image when runtime symbols are missing (`/I`).
    pub scan_images: bool,
    /// Request elevated debug privileges before attaching (`/P`).
    pub request_privileges: bool,
    /// The processes to examine.
    pub pids: Vec<ProcessId>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            show_all_threads: true,
            show_frames: false,
            scan_images: false,
            request_privileges: false,
            pids: Vec::new(),
        }
    }
}

/// The outcome of parsing: run the workflow, or quit successfully.
///
/// `/V` and `/?` print their output during parsing and quit; treating that
/// as an explicit outcome keeps early exits out of the error path.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    /// Run the stack printer with these options.
    Run(Options),
    /// Usage or version output was requested; exit successfully.
    Quit,
}

/// Parses the command line, excluding the program name.
pub fn parse<I>(args: I) -> Result<Parsed, UsageError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut options = Options::default();

    for arg in args {
        let arg = arg.as_ref();
        match arg.chars().next() {
            Some('/') | Some('-') => match parse_switch(&mut options, arg)? {
                SwitchOutcome::Continue => {}
                SwitchOutcome::Quit => return Ok(Parsed::Quit),
            },
            Some('0'..='9') => match parse_number::<u32>(arg) {
                Ok(pid) => options.pids.push(ProcessId(pid)),
                Err(_) => {
                    return Err(UsageError(format!("Invalid process ID - \"{arg}\"")));
                }
            },
            _ => return Err(UsageError(format!("Invalid argument - \"{arg}\""))),
        }
    }

    if options.pids.is_empty() {
        return Err(UsageError("No processes specified.".into()));
    }

    Ok(Parsed::Run(options))
}

enum SwitchOutcome {
    Continue,
    Quit,
}

fn parse_switch(options: &mut Options, arg: &str) -> Result<SwitchOutcome, UsageError> {
    let mut chars = arg.chars();
    chars.next(); // the '/' or '-'

    let switch = match (chars.next(), chars.next()) {
        (Some(switch), None) => switch,
        _ => return Err(UsageError(format!("Invalid switch - \"{arg}\""))),
    };

    match switch.to_ascii_uppercase() {
        'A' => options.show_all_threads = true,
        'O' => options.show_all_threads = false,
        'F' => options.show_frames = true,
        'I' => options.scan_images = true,
        'P' => options.request_privileges = true,
        'V' => {
            print_version();
            return Ok(SwitchOutcome::Quit);
        }
        '?' | 'H' => {
            print_usage();
            return Ok(SwitchOutcome::Quit);
        }
        _ => return Err(UsageError(format!("Invalid switch - \"{arg}\""))),
    }

    Ok(SwitchOutcome::Continue)
}

fn print_version() {
    println!("pstack {}", env!("CARGO_PKG_VERSION"));
}

fn print_usage() {
    println!("Usage: pstack [/A | /O] [/F] [/I] [/P] <pid> [<pid> ...]");
    println!();
    println!("Prints a stack trace for each thread of the given processes.");
    println!();
    println!("  /A          Show stacks for all threads in the process (default).");
    println!("  /O          Show a stack only for the active thread.");
    println!("  /F          Include frame pointers in the output.");
    println!("  /I          Scan the on-disk image when runtime symbols are missing.");
    println!("  /P          Request elevated (debug) privileges before attaching.");
    println!("  /V          Print version information and exit.");
    println!("  /? or /H    Print this message and exit.");
    println!();
    println!("Process IDs accept decimal, octal (\"0...\"), and hex (\"0x...\") forms.");
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn parse_run(args: &[&str]) -> Options {
        match parse(args).unwrap() {
            Parsed::Run(options) => options,
            Parsed::Quit => panic!("expected a runnable command line"),
        }
    }

    #[test]
    fn test_defaults() {
        let options = parse_run(&["1234"]);
        assert!(options.show_all_threads);
        assert!(!options.show_frames);
        assert!(!options.scan_images);
        assert!(!options.request_privileges);
        assert_eq!(options.pids, vec![ProcessId(1234)]);
    }

    #[test]
    fn test_pid_radix() {
        let options = parse_run(&["0x10", "010", "10"]);
        assert_eq!(
            options.pids,
            vec![ProcessId(16), ProcessId(8), ProcessId(10)]
        );
    }

    #[test]
    fn test_all_and_only_last_wins() {
        assert!(!parse_run(&["/A", "/O", "1"]).show_all_threads);
        assert!(parse_run(&["/O", "/A", "1"]).show_all_threads);
    }

    #[test]
    fn test_flags() {
        let options = parse_run(&["/F", "/I", "/P", "42", "43"]);
        assert!(options.show_frames);
        assert!(options.scan_images);
        assert!(options.request_privileges);
        assert_eq!(options.pids, vec![ProcessId(42), ProcessId(43)]);
    }

    #[test]
    fn test_dash_switches() {
        assert!(parse_run(&["-F", "7"]).show_frames);
    }

    #[test]
    fn test_no_pids() {
        assert_eq!(
            parse::<[&str; 0]>([]).unwrap_err(),
            UsageError("No processes specified.".into())
        );
    }

    #[test]
    fn test_bad_pid() {
        assert!(parse(["garbage"]).is_err());
        assert!(parse(["12junk"]).is_err());
        assert!(parse(["0x1ffffffff"]).is_err());
    }

    #[test]
    fn test_bad_switch() {
        assert!(parse(["/X", "1"]).is_err());
        assert!(parse(["/AF", "1"]).is_err());
    }
}
