//! `psys` is a library for post-mortem and live introspection of native
//! processes. It consists of multiple largely independent crates bundled
//! behind feature flags, and backs the `pstack` and `addr2ln` operator
//! tools.
//!
//! # What's in the package
//!
//! - Attaching to live processes as a user-mode debugger, pumping debug
//!   events and modelling processes, threads and modules
//! - Frame-by-frame stack walking of stopped threads
//! - Symbol resolution through the platform's in-memory symbolication
//!   service, an image's embedded COFF symbol table, and its export
//!   directory
//! - Demangling for MSVC C++, Itanium C++ and Rust symbols
//!
//! # Usage
//!
//! Add `psys` as a dependency and activate the features you need:
//!
//! - **`image`** (default): Memory-mapped executable images with lazy
//!   symbol-table and export views.
//! - **`debugger`**: The debug-event engine, process model, stack walker
//!   and live symbol engine.
//! - **`demangle`**: Best-effort function-name demangling.

#![warn(missing_docs)]

#[doc(inline)]
pub use psys_common as common;

#[doc(inline)]
#[cfg(feature = "debugger")]
pub use psys_debugger as debugger;

#[doc(inline)]
#[cfg(feature = "demangle")]
pub use psys_demangle as demangle;

#[doc(inline)]
#[cfg(feature = "image")]
pub use psys_image as image;
