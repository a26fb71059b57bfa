// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::capture::{platform_capturer, StackCapturer};
use super::crash_handler::saved_crash_ip;
use crate::crash_info::{FaultKind, StackTrace};
use crate::presentation::{normalize_frame_names, TraceFormatter};
use crate::shared::configuration::DiagnosticsConfiguration;
use crate::shared::constants::*;
use crate::symbolizer::{reconcile, ExternalSymbolizer};
use std::io::{self, Write};

/// Captures the calling thread's stack and runs it through symbolization and name cleanup.
/// Filtering happens later, when the trace is formatted.
pub fn capture_stack_trace(config: &DiagnosticsConfiguration) -> StackTrace {
    let mut trace = platform_capturer().capture(STACK_FRAMES_TO_SKIP);
    reconcile(&mut trace, &ExternalSymbolizer::for_config(config));
    normalize_frame_names(&mut trace);
    trace
}

/// Captures, symbolizes and writes the current stack trace to `out`.
pub fn print_stack_trace_to(
    config: &DiagnosticsConfiguration,
    out: &mut impl Write,
) -> io::Result<()> {
    let trace = capture_stack_trace(config);
    TraceFormatter::new(config)
        .with_saved_crash_ip(saved_crash_ip())
        .format(&trace, out)?;
    Ok(())
}

/// Prefixes every line after the first with `*** `, unless it already starts with `***`.
pub fn insert_stars_before_each_line(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            result.push('\n');
            if !line.starts_with(REPORT_MARKER) {
                result.push_str(REPORT_MARKER);
                result.push(' ');
            }
        }
        result.push_str(line);
    }
    result
}

/// Writes the report header:
///
/// ```text
///
/// ***
/// *** CRASH DIAGNOSTICS
/// *** <kind> occurred during program execution:
/// *** <details>
/// ***
/// ```
pub fn emit_banner(out: &mut impl Write, kind: &str, details: &str) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{REPORT_MARKER}")?;
    writeln!(out, "{REPORT_BANNER}")?;
    writeln!(
        out,
        "{REPORT_MARKER} {kind} occurred during program execution:"
    )?;
    writeln!(
        out,
        "{REPORT_MARKER} {}",
        insert_stars_before_each_line(details)
    )?;
    writeln!(out, "{REPORT_MARKER}")?;
    out.flush()
}

/// Full report for a hardware fault or signal: the banner, then the captured trace.
pub fn emit_fault_report(
    out: &mut impl Write,
    fault: FaultKind,
    config: &DiagnosticsConfiguration,
) -> io::Result<()> {
    emit_banner(out, fault.kind(), fault.details())?;
    print_stack_trace_to(config, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_stars() {
        assert_eq!(insert_stars_before_each_line("one line"), "one line");
        assert_eq!(
            insert_stars_before_each_line("first\nsecond\n*** third"),
            "first\n*** second\n*** third"
        );
        assert_eq!(insert_stars_before_each_line(""), "");
    }

    #[test]
    fn test_banner() {
        let mut out = Vec::new();
        emit_banner(&mut out, "A double exception", "3.140000").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\n***\n*** CRASH DIAGNOSTICS\n\
             *** A double exception occurred during program execution:\n\
             *** 3.140000\n***\n"
        );

        let mut out = Vec::new();
        emit_banner(&mut out, "A string exception", "line one\nline two").unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("*** line one\n*** line two\n"));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_fault_report_without_symbolizer() {
        let mut config = DiagnosticsConfiguration::default();
        config.set_symbolizer_path(Some(
            "/nonexistent/definitely-not-a-symbolizer".to_string(),
        ));
        let mut out = Vec::new();
        emit_fault_report(&mut out, FaultKind::SIGSEGV, &config).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("*** A segmentation fault (SIGSEGV) occurred during program execution:\n"));
        // Frames keep whatever name the loader gave them, next to a blank location.
        assert!(!out.contains("approximate"), "{out}");
        if out.contains("Stack trace") {
            assert!(out.contains("\n*** Stack trace:\n"), "{out}");
        }
    }
}
