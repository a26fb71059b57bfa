// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rewrites symbol names into the short spelling shown in reports.

use crate::crash_info::{demangle, StackTrace};
use crate::shared::constants::SYMBOLIZER_NO_INFO;
use regex::Regex;
use std::sync::LazyLock;

const NAMESPACE_NOISE: &[&str] = &[
    "std::",
    "__cxx11::",
    "__cxxabi::",
    "__cxxabiv1::",
    "[abi:cxx11]",
    "__1::",
];

const TYPE_ALIASES: &[(&str, &str)] = &[
    ("basic_ostream", "ostream"),
    ("basic_istream", "istream"),
    ("basic_ofstream", "ofstream"),
    ("basic_ifstream", "ifstream"),
    ("basic_string", "string"),
];

const TEST_BODY_SUFFIXES: &[&str] = &["_Test::TestRealBody", "_Test::TestBody"];

// Spelling of `main` in some generated test runners.
const ENTRY_POINT_ALIAS: &str = "_main_";

// Bounds the fixed-point loop. Each rule only shrinks the name, so this is never reached in
// practice.
const MAX_PASSES: usize = 8;

static RUST_HASH_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::h[0-9a-f]{16}($|::)").expect("valid regex"));

// `my_crate::main` is the user's entry point.
static CRATE_MAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*::main$").expect("valid regex"));

/// Normalizes every function name in `trace` in place.
pub fn normalize_frame_names(trace: &mut StackTrace) {
    for frame in &mut trace.frames {
        frame.function = normalize_function_name(&frame.function);
    }
}

/// Applies the rewrite rules until the name stops changing, so
/// `normalize_function_name(normalize_function_name(x)) == normalize_function_name(x)`.
pub fn normalize_function_name(name: &str) -> String {
    let mut current = name.to_string();
    for _ in 0..MAX_PASSES {
        let next = normalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_once(name: &str) -> String {
    let mut name = demangle(name).unwrap_or_else(|| name.to_string());
    name = RUST_HASH_SUFFIX.replace_all(&name, "${1}").into_owned();
    for noise in NAMESPACE_NOISE {
        name = name.replace(noise, "");
    }
    for (long, short) in TYPE_ALIASES {
        name = name.replace(long, short);
    }
    name = name.replace(SYMBOLIZER_NO_INFO, "");
    for suffix in TEST_BODY_SUFFIXES {
        name = name.replace(suffix, "");
    }
    name = strip_template_args(&name);
    name = name.replace("string const&", "const string&");
    if name == ENTRY_POINT_ALIAS {
        name = "main".to_string();
    }
    if CRATE_MAIN.is_match(&name) {
        name = "main".to_string();
    }
    name
}

/// Removes every balanced `<...>` group. An unmatched `<` is left as is, and so is the `<` of
/// `operator<` / `operator<<`. The `>` of `->` does not close a group. A group opening the name
/// is a Rust qualified path (`<T as Trait>::f`) and only loses its inner groups.
pub fn strip_template_args(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = String::with_capacity(name.len());
    let mut copied_up_to = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'<' && i > 0 && !is_operator_less(&name[..i]) {
            if let Some(close) = matching_close(bytes, i) {
                out.push_str(&name[copied_up_to..i]);
                i = close + 1;
                copied_up_to = i;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&name[copied_up_to..]);
    out
}

fn is_operator_less(before: &str) -> bool {
    before.trim_end_matches('<').ends_with("operator")
}

fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (j, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'<' => depth += 1,
            b'>' if j > 0 && bytes[j - 1] == b'-' => {}
            b'>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_and_alias_cleanup() {
        assert_eq!(
            normalize_function_name(
                "std::__cxx11::basic_string<char, std::char_traits<char>, std::allocator<char> >::size"
            ),
            "string::size"
        );
        assert_eq!(
            normalize_function_name("operator<<(std::basic_ostream<char>&, int)"),
            "operator<<(ostream&, int)"
        );
        assert_eq!(
            normalize_function_name("foo(std::__cxx11::basic_string<char> const&)"),
            "foo(const string&)"
        );
    }

    #[test]
    fn test_template_stripping() {
        assert_eq!(strip_template_args("Vector<Vector<int> >::get"), "Vector::get");
        assert_eq!(strip_template_args("a<b"), "a<b");
        assert_eq!(strip_template_args("a<<b>"), "a<");
        assert_eq!(strip_template_args("operator<"), "operator<");
        assert_eq!(strip_template_args("Grid<int>::operator<"), "Grid::operator<");
        assert_eq!(
            strip_template_args("call<F: Fn() -> R>::run"),
            "call::run"
        );
    }

    #[test]
    fn test_rust_names() {
        assert_eq!(
            normalize_function_name("my_app::level_three::h0123456789abcdef"),
            "my_app::level_three"
        );
        assert_eq!(normalize_function_name("my_app::main"), "main");
        assert_eq!(
            normalize_function_name("my_app::h0123456789abcdef::{{closure}}"),
            "my_app::{{closure}}"
        );
        assert_eq!(
            normalize_function_name("my_app::h0123456789abcdef0::run"),
            "my_app::h0123456789abcdef0::run"
        );
        assert_eq!(
            normalize_function_name("_ZN3std2rt10lang_start17h7a87e81ecc4a9d6cE"),
            "rt::lang_start"
        );
        assert_eq!(
            normalize_function_name("<alloc::vec::Vec<T> as core::ops::Drop>::drop"),
            "<alloc::vec::Vec as core::ops::Drop>::drop"
        );
    }

    #[test]
    fn test_misc_rules() {
        assert_eq!(normalize_function_name("?? ??:0"), "");
        assert_eq!(normalize_function_name("_main_"), "main");
        assert_eq!(normalize_function_name("run_main_loop"), "run_main_loop");
        assert_eq!(normalize_function_name("_main_helper"), "_main_helper");
        assert_eq!(
            normalize_function_name("MathTest_Divide_Test::TestBody"),
            "MathTest_Divide"
        );
        assert_eq!(normalize_function_name("main"), "main");
        assert_eq!(normalize_function_name(""), "");
    }

    #[test]
    fn test_idempotent() {
        let names = [
            "std::__cxx11::basic_string<char, std::char_traits<char> >::basic_string(char const*)",
            "std::basic_ostream<char>& std::operator<< <std::char_traits<char> >(std::basic_ostream<char>&, char const*)",
            "_ZN3Foo3barEv",
            "my_app::level_three::h0123456789abcdef",
            "a<<b>",
            "std::std::basic_basic_string",
            "_main_",
            "(unknown)",
            "<my_app::Grid<u8> as core::fmt::Display>::fmt",
        ];
        for name in names {
            let once = normalize_function_name(name);
            assert_eq!(normalize_function_name(&once), once, "input: {name}");
        }
    }

    #[test]
    fn test_normalize_trace() {
        use crate::crash_info::StackFrame;
        let mut trace = StackTrace::from_frames(vec![
            StackFrame {
                function: "std::vector<int>::at".to_string(),
                ..StackFrame::new()
            },
            StackFrame {
                function: "_main_".to_string(),
                ..StackFrame::new()
            },
        ]);
        normalize_frame_names(&mut trace);
        assert_eq!(trace.frames[0].function, "vector::at");
        assert_eq!(trace.frames[1].function, "main");
    }
}
