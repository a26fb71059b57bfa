// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decides which frames are runtime or library plumbing and stay out of the report.

use crate::crash_info::StackFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Substring,
    Prefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    Function,
    /// The file name without its directories.
    File,
    Location,
}

pub const ALL_FIELDS: &[FrameField] = &[FrameField::Function, FrameField::File, FrameField::Location];
pub const FUNCTION_ONLY: &[FrameField] = &[FrameField::Function];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterRule {
    pub kind: MatchKind,
    pub pattern: &'static str,
    pub fields: &'static [FrameField],
}

impl FilterRule {
    pub const fn exact(pattern: &'static str) -> Self {
        Self::exact_in(pattern, ALL_FIELDS)
    }

    pub const fn exact_in(pattern: &'static str, fields: &'static [FrameField]) -> Self {
        Self {
            kind: MatchKind::Exact,
            pattern,
            fields,
        }
    }

    pub const fn substring(pattern: &'static str) -> Self {
        Self {
            kind: MatchKind::Substring,
            pattern,
            fields: ALL_FIELDS,
        }
    }

    pub const fn prefix(pattern: &'static str) -> Self {
        Self {
            kind: MatchKind::Prefix,
            pattern,
            fields: ALL_FIELDS,
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self.kind {
            MatchKind::Exact => text == self.pattern,
            MatchKind::Substring => text.contains(self.pattern),
            MatchKind::Prefix => text.starts_with(self.pattern),
        }
    }

    pub fn matches_frame(&self, frame: &StackFrame) -> bool {
        self.fields.iter().any(|field| match field {
            FrameField::Function => self.matches(&frame.function),
            FrameField::File => self.matches(file_tail(&frame.file)),
            FrameField::Location => self.matches(&frame.line_str),
        })
    }
}

/// Names that say nothing on their own, process start-up, and the libc frames a raised signal
/// passes through.
const EXACT_RULES: &[FilterRule] = &[
    // A frame without a location still shows in a blank column; only a nameless one is hidden.
    FilterRule::exact_in("", FUNCTION_ONLY),
    FilterRule::exact("??"),
    FilterRule::exact("(unknown)"),
    FilterRule::exact("call_stack"),
    FilterRule::exact("_clone"),
    FilterRule::exact("clone"),
    FilterRule::exact("clone3"),
    FilterRule::exact("error"),
    FilterRule::exact("error(const string&)"),
    FilterRule::exact("error(string)"),
    FilterRule::exact("raise_error"),
    FilterRule::exact("_start"),
    FilterRule::exact("__libc_start_main"),
    FilterRule::exact("__libc_start_call_main"),
    FilterRule::exact("start_thread"),
    FilterRule::exact("_Unwind_Resume"),
    FilterRule::exact("__restore_rt"),
    FilterRule::exact("raise"),
    FilterRule::exact("gsignal"),
    FilterRule::exact("__GI_raise"),
    FilterRule::exact("abort"),
    FilterRule::exact("__GI_abort"),
    FilterRule::exact("pthread_kill"),
    FilterRule::exact("__pthread_kill_implementation"),
    FilterRule::exact("__pthread_kill_internal"),
    FilterRule::exact("rust_panic"),
    FilterRule::exact("__rust_start_panic"),
    FilterRule::exact("__rust_try"),
];

const SUBSTRING_RULES: &[FilterRule] = &[
    // C++ runtime and standard library glue
    FilterRule::substring(" error("),
    FilterRule::substring("__cxa_rethrow"),
    FilterRule::substring("__cxa_call_terminate"),
    FilterRule::substring("__cxa_call_unexpected"),
    FilterRule::substring("__func::"),
    FilterRule::substring("__function::"),
    FilterRule::substring("_endthreadex"),
    FilterRule::substring("_Function_base::_Base_manager::"),
    FilterRule::substring("_Function_handler"),
    FilterRule::substring("_Internal_"),
    FilterRule::substring("__invoke_impl"),
    FilterRule::substring("__invoke_result::type"),
    FilterRule::substring("__invoke_void"),
    FilterRule::substring("__unexpected"),
    FilterRule::substring("thread::_Invoker"),
    FilterRule::substring("thread::_State_impl"),
    FilterRule::substring("_M_invoke"),
    FilterRule::substring("decltype(forward"),
    FilterRule::substring("function::operator"),
    FilterRule::substring("UnhandledException"),
    // OS and toolkit event loops
    FilterRule::substring("_sigtramp"),
    FilterRule::substring("BaseThreadInitThunk"),
    FilterRule::substring("CFRunLoopDoSource"),
    FilterRule::substring("CFRunLoopRun"),
    FilterRule::substring("CFRUNLOOP_IS"),
    FilterRule::substring("crtexe.c"),
    FilterRule::substring("GetModuleFileName"),
    FilterRule::substring("GetProfileString"),
    FilterRule::substring("InitializeExceptionChain"),
    FilterRule::substring("KnownExceptionFilter"),
    FilterRule::substring("pthread_body"),
    FilterRule::substring("pthread_start"),
    FilterRule::substring("QApplication::notify"),
    FilterRule::substring("QApplicationPrivate::"),
    FilterRule::substring("QCoreApplication::"),
    FilterRule::substring("QGuiApplicationPrivate::"),
    FilterRule::substring("QMetaMethod::"),
    FilterRule::substring("QMetaObject::"),
    FilterRule::substring("QObjectPrivate::"),
    FilterRule::substring("qt_plugin_instance"),
    FilterRule::substring("QWidgetBackingStore::"),
    FilterRule::substring("QWindowSystemInterface::"),
    FilterRule::substring("RunCurrentEventLoopInMode"),
    FilterRule::substring("RtlUserThreadStart"),
    FilterRule::substring("WinMain@"),
    FilterRule::substring("testing::"),
    // Rust runtime glue
    FilterRule::substring("rust_begin_unwind"),
    FilterRule::substring("GCC_except_table"),
    FilterRule::substring("rt::lang_start"),
    FilterRule::substring("__rust_begin_short_backtrace"),
    FilterRule::substring("__rust_end_short_backtrace"),
    FilterRule::substring("panicking::"),
    FilterRule::substring("panic::catch_unwind"),
    FilterRule::substring("panic::panic_any"),
    FilterRule::substring("ops::function::"),
    FilterRule::substring("backtrace::"),
    FilterRule::substring("sys::pal::"),
    FilterRule::substring("sys::thread"),
    FilterRule::substring("thread::Builder::spawn_unchecked"),
    // This crate
    FilterRule::substring("libdd_crash_diagnostics::"),
    FilterRule::substring("crash_handler.rs"),
    FilterRule::substring("signal_handler_manager.rs"),
    FilterRule::substring("unhandled_exception_handler.rs"),
    FilterRule::substring("capture_posix.rs"),
    FilterRule::substring("capture_windows.rs"),
];

/// Empty unless a caller brings its own.
const PREFIX_RULES: &[FilterRule] = &[];

/// Hides frames matching any of its rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFilter {
    rules: Vec<FilterRule>,
}

impl Default for FrameFilter {
    fn default() -> Self {
        Self::new(
            EXACT_RULES
                .iter()
                .chain(SUBSTRING_RULES)
                .chain(PREFIX_RULES)
                .copied()
                .collect(),
        )
    }
}

impl FrameFilter {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: FilterRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn should_hide(&self, frame: &StackFrame) -> bool {
        self.rules.iter().any(|rule| rule.matches_frame(frame))
    }

    pub fn should_hide_text(&self, text: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(text))
    }
}

pub(crate) fn file_tail(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(function: &str, file: &str, line_str: &str) -> StackFrame {
        StackFrame {
            function: function.to_string(),
            file: file.to_string(),
            line_str: line_str.to_string(),
            ..StackFrame::new()
        }
    }

    #[test]
    fn test_rule_kinds() {
        assert!(FilterRule::exact("clone").matches("clone"));
        assert!(!FilterRule::exact("clone").matches("clone_box"));
        assert!(FilterRule::substring("panicking::").matches("core::panicking::panic_fmt"));
        assert!(FilterRule::prefix("Q").matches("QObject::event"));
        assert!(!FilterRule::prefix("Q").matches("my_app::Q"));
    }

    #[test]
    fn test_default_rules() {
        let filter = FrameFilter::default();
        assert!(filter.should_hide(&frame("", "main.rs", "main.rs:3")));
        assert!(filter.should_hide(&frame("(unknown)", "", "")));
        assert!(filter.should_hide(&frame("rt::lang_start::{{closure}}", "rt.rs", "rt.rs:10")));
        assert!(filter.should_hide(&frame("__libc_start_main", "", "")));
        assert!(filter.should_hide(&frame(
            "libdd_crash_diagnostics::collector::capture",
            "",
            ""
        )));
        assert!(!filter.should_hide(&frame("my_app::level_three", "main.rs", "main.rs:3")));
        assert!(!filter.should_hide(&frame("main", "main.rs", "main.rs:15")));
    }

    #[test]
    fn test_file_and_location_fields() {
        let filter = FrameFilter::default();
        assert!(filter.should_hide(&frame(
            "handle",
            "/src/collector/crash_handler.rs",
            "x.rs:1"
        )));
        assert!(filter.should_hide(&frame("handle", "crt.c", "crtexe.c:17")));
        assert!(!filter.should_hide(&frame("handle", "crt.c", "")));
        assert!(!filter.should_hide(&frame("level_three", "", "")));
        assert!(!filter.should_hide(&frame("handle", "crt.c", "crt.c:17")));
        assert_eq!(file_tail("/a/b/c.rs"), "c.rs");
        assert_eq!(file_tail("C:\\a\\c.rs"), "c.rs");
        assert_eq!(file_tail("c.rs"), "c.rs");
    }

    #[test]
    fn test_unwinder_frames() {
        let filter = FrameFilter::default();
        assert!(filter.should_hide(&frame("__rustc::rust_begin_unwind", "", "??:?")));
        assert!(filter.should_hide(&frame("rust_begin_unwind", "", "")));
        assert!(filter.should_hide(&frame("GCC_except_table42", "", "")));
        assert!(!filter.should_hide(&frame("begin_unwinding_plan", "", "")));
    }

    #[test]
    fn test_custom_rules() {
        let filter = FrameFilter::new(vec![]).with_rule(FilterRule {
            kind: MatchKind::Prefix,
            pattern: "vendor_",
            fields: &[FrameField::Function],
        });
        assert!(filter.should_hide(&frame("vendor_init", "", "")));
        assert!(!filter.should_hide(&frame("main", "vendor_main.rs", "")));
        assert!(!filter.should_hide(&frame("", "", "")));
        assert!(filter.should_hide_text("vendor_x"));
    }
}
