// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Every frame is looked up twice: by its absolute address, which resolves in non-relocated
//! executables, and by its offset from the module base, which resolves in position independent
//! ones. Whichever answer says more wins.

use super::runner::{ExternalSymbolizer, SymbolizerFamily};
use crate::crash_info::StackTrace;

/// `[address, address2]` for each frame, in frame order.
pub fn lookup_addresses(trace: &StackTrace) -> Vec<usize> {
    trace
        .iter()
        .flat_map(|frame| [frame.address, frame.address2])
        .collect()
}

/// Symbolizes `trace` in one helper invocation. A failed run leaves the frames untouched.
pub fn reconcile(trace: &mut StackTrace, symbolizer: &ExternalSymbolizer) {
    if trace.is_empty() {
        return;
    }
    let output = symbolizer.run(&lookup_addresses(trace));
    if output.is_success() {
        apply_symbolizer_output(trace, &output.text, symbolizer.family());
    }
}

/// Pairs the output lines with frames and fills in locations and missing function names.
pub fn apply_symbolizer_output(trace: &mut StackTrace, output: &str, family: SymbolizerFamily) {
    let lines: Vec<&str> = output.lines().collect();
    for (i, frame) in trace.frames.iter_mut().enumerate() {
        let by_address = lines.get(2 * i).copied().unwrap_or_default();
        let by_offset = lines.get(2 * i + 1).copied().unwrap_or_default();
        let best = choose_best(by_address, by_offset);
        frame.set_location(clean_location(best, family));
        if frame.has_unknown_function() {
            frame.function = extract_function_name(best, family);
        }
    }
}

/// The strictly longer line wins. On a tie the offset line does.
pub fn choose_best<'a>(by_address: &'a str, by_offset: &'a str) -> &'a str {
    if by_address.len() > by_offset.len() {
        by_address
    } else {
        by_offset
    }
}

/// Reduces one line of helper output to `file:line`.
pub fn clean_location(line: &str, family: SymbolizerFamily) -> String {
    let mut location = line;
    if family.uses_at_separator() {
        if let Some(i) = location.rfind(" at ") {
            location = &location[i + 4..];
        }
        if let Some(i) = location.rfind(['/', '\\']) {
            location = &location[i + 1..];
        }
        // "(inlined by)" and "(discriminator N)" annotations
        if let Some(i) = location.rfind(" (") {
            location = &location[..i];
        }
    } else {
        if let Some(i) = location.rfind(" (") {
            location = &location[i + 2..];
        }
        if let Some(i) = location.rfind(')') {
            location = &location[..i];
        }
        // No debug info: all that is left is the "(in module)" group.
        if location.starts_with("in ") {
            location = "";
        }
    }
    location.trim().to_string()
}

/// The function name part of one line of helper output.
pub fn extract_function_name(line: &str, family: SymbolizerFamily) -> String {
    let mut function = line;
    if family.uses_at_separator() {
        if let Some(i) = function.rfind(" at ") {
            function = &function[..i];
        }
    } else {
        if function.ends_with(')') {
            if let Some(i) = function.rfind(" (") {
                function = &function[..i];
            }
        }
        if let Some(i) = function.find(" (in ") {
            function = &function[..i];
        }
    }
    function.trim().to_string()
}
