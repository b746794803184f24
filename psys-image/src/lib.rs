//! Mapping and symbol resolution for native executable images.
//!
//! This crate memory-maps Portable Executable images, parses their headers
//! and exposes the two symbol sources embedded in the file as lazy views:
//!
//! - [`SymbolView`] iterates the raw records of the COFF symbol table,
//!   resolving short and long names against the string table and skipping
//!   auxiliary records.
//! - [`ExportView`] iterates the export directory's parallel tables,
//!   pairing each exported address with its name when the ordinal table
//!   declares one.
//!
//! [`ImageModule`] binds a file to a runtime base address and owns the
//! mapping that both views borrow from. The functions in [`resolve`] search
//! the views for the closest symbol at or below a queried address.
//!
//! # Example
//!
//! ```no_run
//! use psys_common::Addr;
//! use psys_image::{resolve, ImageModule};
//!
//! fn main() -> Result<(), psys_image::ImageError> {
//!     let module = ImageModule::open("foo.dll", Some(Addr(0x400000)))?;
//!     if let Some(symbol) = resolve::find_nearest_symbol(&module, Addr(0x40105A)) {
//!         println!("{} [+0x{:X}]", symbol.name(), symbol.code_offset());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

mod error;
mod exports;
mod module;
mod pe;
pub mod resolve;
mod symbols;

pub use error::ImageError;
pub use exports::{Export, ExportIter, ExportView};
pub use module::ImageModule;
pub use pe::{CoffHeader, DataDirectory, OptionalHeader, PeImage, Section};
pub use symbols::{CoffSymbol, SymbolIter, SymbolView};
