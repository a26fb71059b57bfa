// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::filter::{file_tail, FrameFilter};
use crate::crash_info::{StackFrame, StackTrace};
use crate::shared::configuration::DiagnosticsConfiguration;
use crate::shared::constants::*;
use std::io::{self, Write};

/// Frames below one of these belong to the runtime and are never shown.
const ENTRY_POINTS: &[&str] = &["main", "main()", "main(int, char**)", "qMain", "qMain()"];

/// Renders a `StackTrace` as the aligned `*** location  function` block of a report.
#[derive(Debug, Clone)]
pub struct TraceFormatter {
    filter: FrameFilter,
    filtering_enabled: bool,
    saved_crash_ip: Option<usize>,
    show_header_footer_bars: bool,
}

struct DisplayFrame {
    location: String,
    function: String,
}

impl TraceFormatter {
    pub fn new(config: &DiagnosticsConfiguration) -> Self {
        Self {
            filter: FrameFilter::default(),
            filtering_enabled: config.filtering_enabled(),
            saved_crash_ip: None,
            show_header_footer_bars: config.show_header_footer_bars(),
        }
    }

    pub fn with_filter(mut self, filter: FrameFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Instruction pointer saved by the crash handler, used to flag a trace that only holds the
    /// faulting frame.
    pub fn with_saved_crash_ip(mut self, saved_crash_ip: Option<usize>) -> Self {
        self.saved_crash_ip = saved_crash_ip;
        self
    }

    fn is_visible(&self, frame: &StackFrame) -> bool {
        if !self.filtering_enabled {
            return true;
        }
        let tail_only = StackFrame {
            file: file_tail(&frame.file).to_string(),
            ..frame.clone()
        };
        !self.filter.should_hide(&tail_only)
    }

    /// Writes the report block and returns how many frame lines it contained. Nothing at all is
    /// written when no frame survives filtering.
    pub fn format(&self, trace: &StackTrace, out: &mut impl Write) -> io::Result<usize> {
        let visible: Vec<DisplayFrame> = trace
            .iter()
            .filter(|frame| self.is_visible(frame))
            .map(display_frame)
            .collect();
        if visible.is_empty() {
            return Ok(0);
        }

        let location_width = visible
            .iter()
            .map(|f| f.location.chars().count())
            .max()
            .unwrap_or(0);
        let function_width = visible
            .iter()
            .map(|f| f.function.chars().count())
            .max()
            .unwrap_or(0);
        let bar = format!(
            "{REPORT_MARKER} {}",
            "=".repeat(location_width + 2 + function_width)
        );
        let show_bars = self.show_header_footer_bars && location_width > 0;

        writeln!(out)?;
        if location_width > 0 {
            writeln!(out, "{STACK_TRACE_HEADER_APPROXIMATE}")?;
            if show_bars {
                writeln!(
                    out,
                    "{REPORT_MARKER} {:<location_width$}  function",
                    "file:line"
                )?;
                writeln!(out, "{bar}")?;
            }
        } else {
            writeln!(out, "{STACK_TRACE_HEADER}")?;
        }

        let mut emitted = 0;
        for frame in &visible {
            writeln!(
                out,
                "{REPORT_MARKER} {:<location_width$}  {}",
                frame.location, frame.function
            )?;
            emitted += 1;
            if ENTRY_POINTS.contains(&frame.function.as_str()) {
                break;
            }
        }

        if let (1, Some(saved_ip)) = (trace.len(), self.saved_crash_ip) {
            if trace.frames[0].address == saved_ip {
                writeln!(out, "{PARTIAL_STACK_NOTE}")?;
            }
        }
        if show_bars {
            writeln!(out, "{bar}")?;
        }
        writeln!(out, "{REPORT_MARKER}")?;
        writeln!(out, "{REPORT_MARKER} To learn more about the crash, we strongly")?;
        writeln!(out, "{REPORT_MARKER} suggest running your program under the debugger.")?;
        writeln!(out, "{REPORT_MARKER}")?;
        out.flush()?;
        Ok(emitted)
    }

    pub fn render(&self, trace: &StackTrace) -> String {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.format(trace, &mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

fn display_frame(frame: &StackFrame) -> DisplayFrame {
    let mut function = frame.function.clone();
    if let Some(rest) = function.strip_prefix("Main(") {
        function = format!("main({rest}");
    }
    if !function.is_empty() && !function.contains('(') {
        function.push_str("()");
    }
    if function == "main(int, char**)" || function == "qMain()" {
        function = "main()".to_string();
    }

    let mut location = frame.line_str.trim_end().to_string();
    if location == SYMBOLIZER_NO_INFO {
        location = UNKNOWN_FUNCTION.to_string();
    }
    let line = frame.resolved_line();
    if frame.line_str.is_empty() && line > 0 {
        location = format!("line {line}");
    }
    DisplayFrame { location, function }
}
