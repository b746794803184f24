//! Rust demangling tests.

#![cfg(feature = "rust")]

#[macro_use]
mod utils;

#[test]
fn test_rust_legacy() {
    assert_demangle!(
        "_ZN3std2io4Read11read_to_end17hb85a0f6802e14499E" => "std::io::Read::read_to_end",
        "_ZN71_$LT$Test$u20$$u2b$$u20$$u27$static$u20$as$u20$foo..Bar$LT$Test$GT$$GT$3bar17h8e22771343552d79E" => "<Test + 'static as foo::Bar<Test>>::bar",
    );
}
