//! C++ Itanium demangling tests.
//! cpp_demangle runs the libiberty test suite; a few regression checks here
//! pin down the option configuration.

#![cfg(feature = "cpp")]

#[macro_use]
mod utils;

#[test]
fn test_cpp_demangle() {
    assert_demangle!(
        "_Z28JS_GetPropertyDescriptorByIdP9JSContextN2JS6HandleIP8JSObjectEENS2_I4jsidEENS1_13MutableHandleINS1_18PropertyDescriptorEEE" => "JS_GetPropertyDescriptorById(JSContext*, JS::Handle<JSObject*>, JS::Handle<jsid>, JS::MutableHandle<JS::PropertyDescriptor>)",
        "_ZN12_GLOBAL__N_15startEv" => "(anonymous namespace)::start()",
        "__ZN12_GLOBAL__N_15startEv" => "(anonymous namespace)::start()",
        "_ZN3foo3barEv" => "foo::bar()",
    );
}

#[test]
fn test_cpp_bare_types_are_not_demangled() {
    // cpp_demangle is lenient enough to demangle bare types; without a
    // `_Z` prefix the name must fail instead.
    assert_demangle!(
        "a" => "",
        "i" => "",
    );
}
