// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// The faults the handlers know how to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
#[repr(C)]
pub enum FaultKind {
    SIGSEGV,
    SIGABRT,
    SIGILL,
    SIGFPE,
    SIGINT,
    /// Only produced by the Windows exception filter.
    StackOverflow,
    SIGUSR1,
    UNKNOWN,
}

impl FaultKind {
    pub fn from_signum(signum: libc::c_int) -> Self {
        match signum {
            libc::SIGSEGV => FaultKind::SIGSEGV,
            libc::SIGABRT => FaultKind::SIGABRT,
            libc::SIGILL => FaultKind::SIGILL,
            libc::SIGFPE => FaultKind::SIGFPE,
            libc::SIGINT => FaultKind::SIGINT,
            #[cfg(unix)]
            libc::SIGUSR1 => FaultKind::SIGUSR1,
            _ => FaultKind::UNKNOWN,
        }
    }

    /// Headline used in the report, e.g. "A segmentation fault (SIGSEGV)".
    pub fn kind(self) -> &'static str {
        match self {
            FaultKind::SIGSEGV => "A segmentation fault (SIGSEGV)",
            FaultKind::SIGABRT => "An abort error (SIGABRT)",
            FaultKind::SIGILL => "An illegal instruction error (SIGILL)",
            FaultKind::SIGFPE => "An arithmetic error (SIGFPE)",
            FaultKind::SIGINT => "An interrupt error (SIGINT)",
            FaultKind::StackOverflow => "A stack overflow",
            FaultKind::SIGUSR1 => "Custom signal 1",
            FaultKind::UNKNOWN => "A fatal error",
        }
    }

    pub fn details(self) -> &'static str {
        match self {
            FaultKind::SIGSEGV => {
                "This typically happens when you try to dereference a pointer that is null or invalid."
            }
            FaultKind::SIGABRT => {
                "This error is thrown by system functions that detect corrupt state."
            }
            FaultKind::SIGILL => {
                "This typically happens when you have corrupted your program's memory."
            }
            FaultKind::SIGFPE => {
                "This typically happens when you divide by 0 or produce an overflow."
            }
            FaultKind::SIGINT => {
                "This typically happens when your code timed out because it was stuck in an infinite loop."
            }
            FaultKind::StackOverflow => {
                "This can happen when you have a function that calls itself infinitely."
            }
            FaultKind::SIGUSR1 => "This can happen when you produce infinite output in your code.",
            FaultKind::UNKNOWN => "No details were provided about the error.",
        }
    }

    /// Short lowercase name carried by a `FailureDescriptor`.
    pub fn label(self) -> &'static str {
        match self {
            FaultKind::SIGSEGV => "segmentation fault",
            FaultKind::SIGABRT => "abort",
            FaultKind::SIGILL => "illegal instruction",
            FaultKind::SIGFPE => "arithmetic error",
            FaultKind::SIGINT => "interrupt",
            FaultKind::StackOverflow => "stack overflow",
            FaultKind::SIGUSR1 => "custom signal 1",
            FaultKind::UNKNOWN => "fatal error",
        }
    }

    /// The signal to re-raise once the report is out. A stack overflow has no signal of its
    /// own and dies by SIGABRT.
    pub fn reraise_signum(self, original: libc::c_int) -> libc::c_int {
        match self {
            FaultKind::StackOverflow => libc::SIGABRT,
            _ => original,
        }
    }
}

#[cfg(unix)]
pub use unix::*;

#[cfg(unix)]
mod unix {
    /// Converts a signum into a Signal.  Can't use the from trait because we don't own either type.
    pub fn signal_from_signum(value: libc::c_int) -> anyhow::Result<nix::sys::signal::Signal> {
        nix::sys::signal::Signal::try_from(value)
            .map_err(|e| anyhow::anyhow!("Invalid signal number {value}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_signum() {
        assert_eq!(FaultKind::from_signum(libc::SIGSEGV), FaultKind::SIGSEGV);
        assert_eq!(FaultKind::from_signum(libc::SIGABRT), FaultKind::SIGABRT);
        assert_eq!(FaultKind::from_signum(libc::SIGILL), FaultKind::SIGILL);
        assert_eq!(FaultKind::from_signum(libc::SIGFPE), FaultKind::SIGFPE);
        assert_eq!(FaultKind::from_signum(libc::SIGINT), FaultKind::SIGINT);
        assert_eq!(FaultKind::from_signum(9999), FaultKind::UNKNOWN);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            FaultKind::SIGSEGV.kind(),
            "A segmentation fault (SIGSEGV)"
        );
        assert!(FaultKind::SIGSEGV.details().contains("null or invalid"));
        assert_eq!(FaultKind::UNKNOWN.kind(), "A fatal error");
        assert_eq!(
            FaultKind::UNKNOWN.details(),
            "No details were provided about the error."
        );
        assert_eq!(FaultKind::SIGSEGV.label(), "segmentation fault");
    }

    #[test]
    fn test_reraise_signum() {
        assert_eq!(
            FaultKind::StackOverflow.reraise_signum(libc::SIGSEGV),
            libc::SIGABRT
        );
        assert_eq!(
            FaultKind::SIGFPE.reraise_signum(libc::SIGFPE),
            libc::SIGFPE
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_signal_from_signum() {
        assert_eq!(
            signal_from_signum(libc::SIGSEGV).unwrap(),
            nix::sys::signal::Signal::SIGSEGV
        );
        assert_eq!(FaultKind::from_signum(libc::SIGUSR1), FaultKind::SIGUSR1);
        assert!(signal_from_signum(0).is_err());
        assert!(signal_from_signum(9999).is_err());
    }
}
