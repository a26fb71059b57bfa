// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Maximum number of frames captured by the POSIX backend.
pub const STACK_FRAMES_MAX_POSIX: usize = 50;
/// Maximum number of frames captured by the Windows backend.
pub const STACK_FRAMES_MAX_WINDOWS: usize = 20;
/// Innermost frames dropped before symbolization.
pub const STACK_FRAMES_TO_SKIP: usize = 0;

/// Placeholder stored in `StackFrame::function` when the loader knows the module but not the
/// symbol.
pub const UNKNOWN_FUNCTION: &str = "(unknown)";
/// What addr2line prints when it knows nothing about an address.
pub const SYMBOLIZER_NO_INFO: &str = "?? ??:0";

pub const REPORT_MARKER: &str = "***";
pub const REPORT_BANNER: &str = "*** CRASH DIAGNOSTICS";
pub const STACK_TRACE_HEADER: &str = "*** Stack trace:";
pub const STACK_TRACE_HEADER_APPROXIMATE: &str = "*** Stack trace (line numbers are approximate):";
pub const PARTIAL_STACK_NOTE: &str = "*** (partial stack due to crash)";

pub const ENV_FILTER: &str = "DD_CRASH_DIAGNOSTICS_FILTER";
pub const ENV_BARS: &str = "DD_CRASH_DIAGNOSTICS_BARS";
pub const ENV_MODE: &str = "DD_CRASH_DIAGNOSTICS_MODE";
pub const ENV_SYMBOLIZER: &str = "DD_CRASH_DIAGNOSTICS_SYMBOLIZER";
