// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::capture::StackCapturer;
use crate::crash_info::{demangle, StackFrame, StackTrace};
use crate::shared::constants::{STACK_FRAMES_MAX_POSIX, UNKNOWN_FUNCTION};
use std::ffi::CStr;

/// Unwinds with `backtrace` and names each address with `dladdr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosixCapturer {
    max_frames: usize,
}

impl Default for PosixCapturer {
    fn default() -> Self {
        Self::new(STACK_FRAMES_MAX_POSIX)
    }
}

impl PosixCapturer {
    pub fn new(max_frames: usize) -> Self {
        Self { max_frames }
    }
}

impl StackCapturer for PosixCapturer {
    fn max_frames(&self) -> usize {
        self.max_frames
    }

    fn capture(&self, skip: usize) -> StackTrace {
        let mut ips = Vec::with_capacity(self.max_frames);
        // SAFETY: `trace_unsynchronized` is not guarded against concurrent unwinding, and may
        // run inside a signal handler. Only the instruction pointers are collected here, which
        // is the part of unwinding that has been observed to be safe during a crash.
        // https://github.com/rust-lang/backtrace-rs/issues/414
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                ips.push(frame.ip() as usize);
                ips.len() < self.max_frames
            });
        }
        StackTrace::from_frames(ips.into_iter().skip(skip).filter_map(resolve_with_dladdr).collect())
    }
}

/// Names `ip` from the dynamic loader's tables. Addresses outside any loaded module are
/// dropped.
fn resolve_with_dladdr(ip: usize) -> Option<StackFrame> {
    // SAFETY: Dl_info is plain data; an all-zero value is valid.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // SAFETY: dladdr only reads the loader's tables and fills `info`.
    if unsafe { libc::dladdr(ip as *const libc::c_void, &mut info) } == 0 {
        return None;
    }
    if info.dli_fname.is_null() {
        return None;
    }
    // SAFETY: non-null loader strings are NUL-terminated and live as long as the module.
    let file = unsafe { CStr::from_ptr(info.dli_fname) }
        .to_string_lossy()
        .into_owned();
    let function = if info.dli_sname.is_null() {
        UNKNOWN_FUNCTION.to_string()
    } else {
        // SAFETY: as above.
        let raw = unsafe { CStr::from_ptr(info.dli_sname) }.to_string_lossy();
        demangle(&raw).unwrap_or_else(|| raw.into_owned())
    };
    let address2 = if info.dli_fbase.is_null() {
        info.dli_saddr as usize
    } else {
        ip.abs_diff(info.dli_fbase as usize)
    };
    Some(StackFrame {
        file,
        function,
        address: ip,
        address2,
        ..StackFrame::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_capture_respects_max_frames() {
        let trace = PosixCapturer::new(3).capture(0);
        assert!(trace.len() <= 3);
        assert!(!trace.is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_capture_frames_have_modules() {
        let trace = PosixCapturer::default().capture(0);
        assert!(trace.len() <= STACK_FRAMES_MAX_POSIX);
        for frame in trace.iter() {
            assert!(!frame.file.is_empty());
            assert!(!frame.function.is_empty());
            assert_ne!(frame.address, 0);
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_skip() {
        let all = PosixCapturer::new(10).capture(0);
        let skipped = PosixCapturer::new(10).capture(all.len());
        assert!(skipped.is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_dladdr_known_symbol() {
        let frame = resolve_with_dladdr(libc::getpid as usize).unwrap();
        assert!(frame.function.contains("getpid"));
        assert!(frame.address2 <= frame.address);
        assert!(resolve_with_dladdr(1).is_none());
    }
}
