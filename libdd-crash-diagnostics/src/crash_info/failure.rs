// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::FaultKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

/// A fault or escaped panic, reduced to what an unattended harness needs to record it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    /// Short lowercase category, e.g. "segmentation fault" or "double".
    pub kind: String,
    pub details: String,
    /// Report text rendered where the failure happened, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl FailureDescriptor {
    pub fn new(kind: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            details: details.into(),
            stack_trace: None,
        }
    }

    pub fn from_fault(fault: FaultKind) -> Self {
        Self::new(
            fault.label(),
            format!("{}.\n{}", fault.kind(), fault.details()),
        )
    }

    pub fn with_stack_trace(mut self, stack_trace: Option<String>) -> Self {
        self.stack_trace = stack_trace;
        self
    }
}

impl fmt::Display for FailureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.details)
    }
}

impl std::error::Error for FailureDescriptor {}

/// The library's own error. `raise_error` panics with one of these after rendering the stack of
/// the raising thread, so the report shows where the error was raised rather than where the
/// panic hook ran.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct LibraryError {
    message: String,
    stack_trace: Option<String>,
}

impl LibraryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Builds an error carrying the rendered stack of the calling thread.
    pub fn capture(message: impl Into<String>) -> Self {
        let mut rendered = Vec::new();
        crate::collector::with_config(|config| {
            let _ = crate::collector::print_stack_trace_to(config, &mut rendered);
        });
        Self::new(message).with_stack_trace(String::from_utf8_lossy(&rendered).into_owned())
    }

    pub fn with_stack_trace(mut self, stack_trace: String) -> Self {
        self.stack_trace = if stack_trace.is_empty() {
            None
        } else {
            Some(stack_trace)
        };
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    pub fn has_stack_trace(&self) -> bool {
        self.stack_trace.is_some()
    }

    /// Writes the full report for this error: the banner, the message and the trace captured
    /// when it was raised.
    pub fn dump(&self, out: &mut impl Write) -> std::io::Result<()> {
        use crate::collector::{emit_banner, LIBRARY_ERROR_REPORT_KIND};
        emit_banner(out, LIBRARY_ERROR_REPORT_KIND, &self.message)?;
        if let Some(trace) = &self.stack_trace {
            out.write_all(trace.as_bytes())?;
        }
        out.flush()
    }
}

/// Raises a `LibraryError` carrying the current stack trace. Under an enabled top-level handler
/// this ends in a report; inside `catch_failure` it becomes a `FailureDescriptor` of kind
/// "error".
pub fn raise_error(message: impl Into<String>) -> ! {
    std::panic::panic_any(LibraryError::capture(message))
}
