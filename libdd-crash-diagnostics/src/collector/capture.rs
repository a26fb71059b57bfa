// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::crash_info::StackTrace;

/// Walks the calling thread's stack into raw, partially named frames.
pub trait StackCapturer {
    /// Upper bound on the number of frames returned.
    fn max_frames(&self) -> usize;

    /// Captures the current stack, innermost first, after dropping `skip` frames. A stack that
    /// cannot be walked yields an empty trace.
    fn capture(&self, skip: usize) -> StackTrace;
}

#[cfg(unix)]
pub fn platform_capturer() -> impl StackCapturer {
    super::capture_posix::PosixCapturer::default()
}

#[cfg(windows)]
pub fn platform_capturer() -> impl StackCapturer {
    super::capture_windows::WindowsCapturer::default()
}
