//! The `addr2ln` operator tool: resolve code addresses against an image's
//! embedded debug symbols and export table.

use std::env;
use std::io::Write;

use tracing_subscriber::EnvFilter;

use psys_common::Addr;
use psys_demangle::try_demangle;
use psys_image::{resolve, ImageError, ImageModule};

mod options;

use options::{Options, Parsed, UsageError};

/// Maps a workflow failure onto the tool's exit code: the native error
/// code for OS failures, -2 for malformed images.
fn exit_code_for(err: &ImageError) -> i32 {
    match err {
        ImageError::Io(io_err) => io_err.raw_os_error().unwrap_or(-2),
        ImageError::Malformed(_) | ImageError::Truncated(_) => -2,
    }
}

/// One line to stderr, prefixed by the program name. Debug builds append
/// the error's internal representation for context.
fn report_error(program: &str, err: &ImageError) {
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
        .unwrap_or_else(|| "addr2ln".to_string())
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

    match resolve_addresses(&options) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&program, &err);
            exit_code_for(&err)
        }
    }
}

/// Maps the image once and renders one line per requested address.
fn resolve_addresses(options: &Options) -> Result<(), ImageError> {
    let module = ImageModule::open(&options.module, options.base)?;

    if options.dump_symbols {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, " -- {} --", options.module.display())?;
        module.dump_module_info(&mut out)?;
        module.dump_symbols(&mut out)?;
    }

    for &addr in &options.addresses {
        println!("{}", symbol_line(&module, addr));
    }

    Ok(())
}

/// Renders `<addr> - <name> [+0x<off>]` or `<addr> - NOT FOUND.`.
fn symbol_line(module: &ImageModule<'_>, addr: Addr) -> String {
    let symbol = match resolve::find_nearest_symbol(module, addr) {
        Some(symbol) => symbol,
        None => return format!("{addr} - NOT FOUND."),
    };

    let mut line = format!("{addr} - {}", try_demangle(symbol.name()));
    if symbol.code_offset() > 0 {
        line.push_str(&format!(" [+0x{:X}]", symbol.code_offset()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    use psys_common::ByteView;

    use similar_asserts::assert_eq;

    // A minimal image: DOS stub, COFF header without optional header or
    // sections, and a symbol table with one function record.
    fn image_with_symbol(name: &[u8; 8], rva: u32) -> Vec<u8> {
        let mut data = vec![0u8; 0x200];

        data[0] = b'M';
        data[1] = b'Z';
        data[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
        data[0x80..0x84].copy_from_slice(b"PE\0\0");

        let coff = 0x84;
        data[coff..coff + 2].copy_from_slice(&0x8664u16.to_le_bytes());
        data[coff + 8..coff + 12].copy_from_slice(&0x200u32.to_le_bytes());
        data[coff + 12..coff + 16].copy_from_slice(&1u32.to_le_bytes());

        data.extend_from_slice(name);
        data.extend_from_slice(&rva.to_le_bytes());
        data.extend_from_slice(&1i16.to_le_bytes());
        data.extend_from_slice(&0x20u16.to_le_bytes());
        data.push(2);
        data.push(0);
        data.extend_from_slice(&4u32.to_le_bytes());

        data
    }

    fn module(data: &[u8], base: u64) -> ImageModule<'_> {
        ImageModule::from_view(
            ByteView::from_slice(data),
            "foo.dll".into(),
            Some(Addr(base)),
        )
        .unwrap()
    }

    #[test]
    fn test_symbol_line_with_offset() {
        let data = image_with_symbol(b"foo\0\0\0\0\0", 0x1000);
        let module = module(&data, 0x400000);

        assert_eq!(
            symbol_line(&module, Addr(0x40105A)),
            "0x000000000040105A - foo [+0x5A]"
        );
    }

    #[test]
    fn test_symbol_line_exact_match() {
        let data = image_with_symbol(b"foo\0\0\0\0\0", 0x1000);
        let module = module(&data, 0x400000);

        assert_eq!(symbol_line(&module, Addr(0x401000)), "0x0000000000401000 - foo");
    }

    #[test]
    fn test_symbol_line_not_found() {
        let data = image_with_symbol(b"foo\0\0\0\0\0", 0x1000);
        let module = module(&data, 0x400000);

        assert_eq!(
            symbol_line(&module, Addr(0xDEAD)),
            "0x000000000000DEAD - NOT FOUND."
        );
    }
}
