//! Best-effort demangling for native function names.
//!
//! Supported mangling schemes are MSVC C++ (`features = ["msvc"]`), Itanium
//! C++ (`features = ["cpp"]`) and Rust (`features = ["rust"]`). The scheme
//! is detected from the mangled name itself.
//!
//! The central contract of [`demangle`] is that it never fails loudly: a
//! name that cannot be demangled, for whatever reason, produces the empty
//! string, and the caller falls back to the original. [`try_demangle`]
//! performs that fallback directly.
//!
//! # Examples
//!
//! ```
//! # #[cfg(feature = "cpp")] {
//! use psys_demangle::{demangle, try_demangle};
//!
//! assert_eq!(demangle("_ZN3foo3barEv"), "foo::bar()");
//! assert_eq!(demangle("not mangled"), "");
//! assert_eq!(try_demangle("not mangled"), "not mangled");
//! # }
//! ```

#![warn(missing_docs)]

use std::borrow::Cow;

fn is_maybe_msvc(ident: &str) -> bool {
    ident.starts_with('?') || ident.starts_with("@?")
}

fn is_maybe_cpp(ident: &str) -> bool {
    ident.starts_with("_Z")
        || ident.starts_with("__Z")
        || ident.starts_with("___Z")
        || ident.starts_with("____Z")
}

#[cfg(feature = "msvc")]
fn try_demangle_msvc(ident: &str) -> Option<String> {
    use msvc_demangler::DemangleFlags as MsvcFlags;

    let flags = MsvcFlags::COMPLETE
        | MsvcFlags::SPACE_AFTER_COMMA
        | MsvcFlags::HUG_TYPE
        | MsvcFlags::NO_MS_KEYWORDS
        | MsvcFlags::NO_CLASS_TYPE
        | MsvcFlags::NO_FUNCTION_RETURNS;

    msvc_demangler::demangle(ident, flags).ok()
}

#[cfg(not(feature = "msvc"))]
fn try_demangle_msvc(_ident: &str) -> Option<String> {
    None
}

#[cfg(feature = "cpp")]
fn try_demangle_cpp(ident: &str) -> Option<String> {
    use cpp_demangle::{DemangleOptions as CppOptions, ParseOptions, Symbol as CppSymbol};

    let parse_options = ParseOptions::default().recursion_limit(160);
    let symbol = CppSymbol::new_with_options(ident, &parse_options).ok()?;

    let cpp_options = CppOptions::new()
        .recursion_limit(192)
        .no_return_type();

    symbol.demangle(&cpp_options).ok()
}

#[cfg(not(feature = "cpp"))]
fn try_demangle_cpp(_ident: &str) -> Option<String> {
    None
}

#[cfg(feature = "rust")]
fn try_demangle_rust(ident: &str) -> Option<String> {
    match rustc_demangle::try_demangle(ident) {
        Ok(demangled) => Some(format!("{demangled:#}")),
        Err(_) => None,
    }
}

#[cfg(not(feature = "rust"))]
fn try_demangle_rust(_ident: &str) -> Option<String> {
    None
}

/// Demangles a function name, returning the empty string on failure.
///
/// The mangling scheme is detected from the name. Plain, undecorated names
/// are not recognized by any scheme and therefore produce the empty string;
/// callers fall back to the name they passed in. This function never
/// panics and never returns an error.
pub fn demangle(ident: &str) -> String {
    if is_maybe_msvc(ident) {
        return try_demangle_msvc(ident).unwrap_or_default();
    }

    // Rust names share the `_Z` prefix space with Itanium C++; try the
    // stricter Rust decoder first so hashes get stripped.
    if let Some(demangled) = try_demangle_rust(ident) {
        return demangled;
    }

    if is_maybe_cpp(ident) {
        return try_demangle_cpp(ident).unwrap_or_default();
    }

    String::new()
}

/// Demangles a function name, falling back to the original on failure.
pub fn try_demangle(ident: &str) -> Cow<'_, str> {
    match demangle(ident) {
        demangled if demangled.is_empty() => Cow::Borrowed(ident),
        demangled => Cow::Owned(demangled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_undecorated_name_fails_empty() {
        assert_eq!(demangle("BaseThreadInitThunk"), "");
        assert_eq!(demangle(""), "");
    }

    #[test]
    fn test_fallback_keeps_input() {
        assert_eq!(try_demangle("BaseThreadInitThunk"), "BaseThreadInitThunk");
    }

    #[test]
    fn test_idempotent_on_failures() {
        for ident in ["", "BaseThreadInitThunk"] {
            assert_eq!(demangle(&demangle(ident)), demangle(ident));
        }
    }
}
