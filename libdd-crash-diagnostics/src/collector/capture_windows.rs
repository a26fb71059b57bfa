// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::capture::StackCapturer;
use super::crash_handler::{saved_crash_ip, saved_crash_is_stack_overflow};
use crate::crash_info::{demangle, StackFrame, StackTrace};
use crate::shared::constants::{STACK_FRAMES_MAX_WINDOWS, UNKNOWN_FUNCTION};

/// Unwinds with `backtrace` (dbghelp underneath) and records module-relative offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowsCapturer {
    max_frames: usize,
}

impl Default for WindowsCapturer {
    fn default() -> Self {
        Self::new(STACK_FRAMES_MAX_WINDOWS)
    }
}

impl WindowsCapturer {
    pub fn new(max_frames: usize) -> Self {
        Self { max_frames }
    }
}

impl StackCapturer for WindowsCapturer {
    fn max_frames(&self) -> usize {
        self.max_frames
    }

    fn capture(&self, skip: usize) -> StackTrace {
        // The overflowed stack cannot be walked; the faulting address is all there is.
        if saved_crash_is_stack_overflow() {
            let frames = saved_crash_ip()
                .map(|ip| vec![StackFrame::with_address(ip, ip)])
                .unwrap_or_default();
            return StackTrace::from_frames(frames);
        }

        let mut frames = Vec::with_capacity(self.max_frames);
        // SAFETY: dbghelp is not thread safe. Captures run on the faulting thread, one fault at a
        // time.
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                let ip = frame.ip() as usize;
                let base = frame.module_base_address().map(|b| b as usize);
                let mut function = None;
                backtrace::resolve_frame_unsynchronized(frame, |symbol| {
                    if function.is_none() {
                        function = symbol.name().map(|name| {
                            let raw = name.as_str().map(str::to_string);
                            raw.and_then(|raw| demangle(&raw).or(Some(raw)))
                                .unwrap_or_else(|| name.to_string())
                        });
                    }
                });
                frames.push(StackFrame {
                    function: function.unwrap_or_else(|| UNKNOWN_FUNCTION.to_string()),
                    address: ip,
                    address2: base.map_or(ip, |base| ip.abs_diff(base)),
                    ..StackFrame::new()
                });
                frames.len() < self.max_frames
            });
        }
        StackTrace::from_frames(frames.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_capture_respects_max_frames() {
        let trace = WindowsCapturer::new(3).capture(0);
        assert!(trace.len() <= 3);
        assert!(!trace.is_empty());
    }
}
