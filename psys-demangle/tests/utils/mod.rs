/// Asserts a table of mangled names against their expected demanglings.
macro_rules! assert_demangle {
    ($($input:literal => $output:literal),* $(,)?) => {
        $(
            similar_asserts::assert_eq!(psys_demangle::demangle($input), $output);
        )*
    };
}
