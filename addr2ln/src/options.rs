//! Command-line parsing for `addr2ln`.

use std::fmt;
use std::path::PathBuf;

use psys_common::{parse_number, Addr};

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
    /// The image file to resolve against.
    pub module: PathBuf,
    /// The load base overriding the image's preferred base (`/b`).
    pub base: Option<Addr>,
    /// Dump the module summary and all symbols first (`/S`).
    pub dump_symbols: bool,
    /// The addresses to resolve.
    pub addresses: Vec<Addr>,
}

/// The outcome of parsing: run the workflow, or quit successfully.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    /// Resolve addresses with these options.
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
    let mut module: Option<PathBuf> = None;
    let mut base = None;
    let mut dump_symbols = false;
    let mut addresses = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        match arg.chars().next() {
            Some('/') | Some('-') if arg.len() > 1 => {
                match arg[1..].to_ascii_uppercase().as_str() {
                    "B" => {
                        let value = args
                            .next()
                            .ok_or_else(|| UsageError("Missing base address after /b.".into()))?;
                        let value = value.as_ref();
                        let digits = value
                            .strip_prefix("0x")
                            .or_else(|| value.strip_prefix("0X"))
                            .unwrap_or(value);
                        let parsed = u64::from_str_radix(digits, 16).map_err(|_| {
                            UsageError(format!("Invalid base address - \"{value}\""))
                        })?;
                        base = Some(Addr(parsed));
                    }
                    "S" => dump_symbols = true,
                    "V" => {
                        print_version();
                        return Ok(Parsed::Quit);
                    }
                    "?" | "H" => {
                        print_usage();
                        return Ok(Parsed::Quit);
                    }
                    _ => return Err(UsageError(format!("Invalid switch - \"{arg}\""))),
                }
            }
            Some('0'..='9') if module.is_some() => match parse_number::<u64>(arg) {
                Ok(addr) => addresses.push(Addr(addr)),
                Err(_) => return Err(UsageError(format!("Invalid address - \"{arg}\""))),
            },
            Some(_) if module.is_none() => module = Some(PathBuf::from(arg)),
            _ => return Err(UsageError(format!("Invalid argument - \"{arg}\""))),
        }
    }

    let module = module.ok_or_else(|| UsageError("No module file specified.".into()))?;

    if addresses.is_empty() && !dump_symbols {
        return Err(UsageError("No addresses specified.".into()));
    }

    Ok(Parsed::Run(Options {
        module,
        base,
        dump_symbols,
        addresses,
    }))
}

fn print_version() {
    println!("addr2ln {}", env!("CARGO_PKG_VERSION"));
}

fn print_usage() {
    println!("Usage: addr2ln <module-path> [/b <base-hex>] [/S] <addr> [<addr> ...]");
    println!();
    println!("Resolves code addresses against the module's debug symbols and exports.");
    println!();
    println!("  /b <base>   Load base of the module in hex; defaults to the base");
    println!("              encoded in the image.");
    println!("  /S          Dump the module summary and all symbols first.");
    println!("  /V          Print version information and exit.");
    println!("  /? or /H    Print this message and exit.");
    println!();
    println!("Addresses accept decimal, octal (\"0...\"), and hex (\"0x...\") forms.");
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
    fn test_module_and_addresses() {
        let options = parse_run(&["foo.dll", "0x40105A", "0x40200A"]);
        assert_eq!(options.module, PathBuf::from("foo.dll"));
        assert_eq!(options.base, None);
        assert_eq!(options.addresses, vec![Addr(0x40105A), Addr(0x40200A)]);
    }

    #[test]
    fn test_base_switch() {
        let options = parse_run(&["foo.dll", "/b", "400000", "0x401000"]);
        assert_eq!(options.base, Some(Addr(0x400000)));

        let options = parse_run(&["foo.dll", "/b", "0x400000", "0x401000"]);
        assert_eq!(options.base, Some(Addr(0x400000)));
    }

    #[test]
    fn test_address_radix() {
        let options = parse_run(&["foo.dll", "16", "010", "0x10"]);
        assert_eq!(
            options.addresses,
            vec![Addr(16), Addr(8), Addr(16)]
        );
    }

    #[test]
    fn test_dump_allows_no_addresses() {
        let options = parse_run(&["foo.dll", "/S"]);
        assert!(options.dump_symbols);
        assert!(options.addresses.is_empty());
    }

    #[test]
    fn test_missing_module() {
        assert_eq!(
            parse::<[&str; 0]>([]).unwrap_err(),
            UsageError("No module file specified.".into())
        );
    }

    #[test]
    fn test_missing_addresses() {
        assert_eq!(
            parse(["foo.dll"]).unwrap_err(),
            UsageError("No addresses specified.".into())
        );
    }

    #[test]
    fn test_missing_base_value() {
        assert!(parse(["foo.dll", "/b"]).is_err());
        assert!(parse(["foo.dll", "/b", "garbage", "1"]).is_err());
    }

    #[test]
    fn test_bad_address() {
        assert!(parse(["foo.dll", "1xyz"]).is_err());
    }
}
