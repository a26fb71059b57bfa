// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::crash_handler::{claim_panic_report, with_config};
use super::emitters::{emit_banner, print_stack_trace_to};
use crate::crash_info::{FailureDescriptor, LibraryError};
use crate::shared::configuration::DiagnosticsConfiguration;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::io::{self, Write};
use std::panic::{self, PanicHookInfo, UnwindSafe};
use std::ptr;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering::SeqCst;

pub const LIBRARY_ERROR_REPORT_KIND: &str = "A library error";
const UNKNOWN_DETAILS: &str = "(unknown exception details)";

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync>;
static PREVIOUS_PANIC_HOOK: AtomicPtr<PanicHook> = AtomicPtr::new(ptr::null_mut());

thread_local! {
    // Trace rendered by the panic hook for a panic inside `catch_failure`, picked up once it is
    // caught.
    static LAST_PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
    // How many `catch_failure` calls are running on this thread.
    static CATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A panic payload, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtValue {
    /// Short name, e.g. "double". Becomes `FailureDescriptor::kind`.
    pub kind: &'static str,
    /// Headline used in the printed report, e.g. "A double exception".
    pub report_kind: &'static str,
    pub message: String,
    /// Pre-rendered trace carried by the payload itself.
    pub stack_trace: Option<String>,
}

impl UncaughtValue {
    fn new(kind: &'static str, report_kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            report_kind,
            message: message.into(),
            stack_trace: None,
        }
    }
}

/// Identifies what a panic carried. The first matching type wins, in this order:
/// `FailureDescriptor`, `LibraryError`, boxed errors, `anyhow::Error`, `bool`, `char`, strings,
/// `i32`, `i64`, floats. Anything else is "unknown".
pub fn classify_panic_payload(payload: &(dyn Any + Send)) -> UncaughtValue {
    if let Some(failure) = payload.downcast_ref::<FailureDescriptor>() {
        let mut value = UncaughtValue::new("failure", "A failure", failure.details.clone());
        value.stack_trace = failure.stack_trace.clone();
        return value;
    }
    if let Some(error) = payload.downcast_ref::<LibraryError>() {
        let mut value = UncaughtValue::new("error", LIBRARY_ERROR_REPORT_KIND, error.message());
        value.stack_trace = error.stack_trace().map(str::to_string);
        return value;
    }
    if let Some(error) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        return UncaughtValue::new("exception", "An exception", error.to_string());
    }
    if let Some(error) = payload.downcast_ref::<anyhow::Error>() {
        return UncaughtValue::new("exception", "An exception", format!("{error:#}"));
    }
    if let Some(b) = payload.downcast_ref::<bool>() {
        return UncaughtValue::new("bool", "A bool exception", b.to_string());
    }
    if let Some(c) = payload.downcast_ref::<char>() {
        return UncaughtValue::new("char", "A char exception", c.to_string());
    }
    if let Some(s) = payload.downcast_ref::<&str>() {
        return UncaughtValue::new("string", "A string exception", *s);
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return UncaughtValue::new("string", "A string exception", s.as_str());
    }
    if let Some(n) = payload.downcast_ref::<i32>() {
        return UncaughtValue::new("int", "An int exception", n.to_string());
    }
    if let Some(n) = payload.downcast_ref::<i64>() {
        return UncaughtValue::new("long", "A long exception", n.to_string());
    }
    if let Some(d) = payload.downcast_ref::<f64>() {
        return UncaughtValue::new("double", "A double exception", format!("{d:.6}"));
    }
    if let Some(d) = payload.downcast_ref::<f32>() {
        return UncaughtValue::new("double", "A double exception", format!("{d:.6}"));
    }
    UncaughtValue::new("unknown", "An exception", UNKNOWN_DETAILS)
}

/// Converts a caught panic payload into a `FailureDescriptor`. A payload that already is one
/// is returned unchanged.
pub fn failure_from_payload(payload: &(dyn Any + Send)) -> FailureDescriptor {
    if let Some(failure) = payload.downcast_ref::<FailureDescriptor>() {
        return failure.clone();
    }
    let value = classify_panic_payload(payload);
    let stack_trace = value.stack_trace.or_else(take_last_panic_trace);
    FailureDescriptor::new(value.kind, value.message).with_stack_trace(stack_trace)
}

/// Runs `f`, turning any panic that escapes it (including faults raised in unattended mode)
/// into a `FailureDescriptor`.
pub fn catch_failure<F, R>(f: F) -> Result<R, FailureDescriptor>
where
    F: FnOnce() -> R + UnwindSafe,
{
    take_last_panic_trace();
    CATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let result = panic::catch_unwind(f);
    CATCH_DEPTH.with(|depth| depth.set(depth.get() - 1));
    result.map_err(|payload| failure_from_payload(payload.as_ref()))
}

fn inside_catch_failure() -> bool {
    CATCH_DEPTH.try_with(Cell::get).unwrap_or(0) > 0
}

fn take_last_panic_trace() -> Option<String> {
    LAST_PANIC_TRACE
        .try_with(|trace| trace.borrow_mut().take())
        .ok()
        .flatten()
}

/// Writes the report for an uncaught value: the banner, then the trace it carries or, failing
/// that, a freshly captured one.
pub fn write_uncaught_report(
    out: &mut impl Write,
    value: &UncaughtValue,
    config: &DiagnosticsConfiguration,
) -> io::Result<()> {
    emit_banner(out, value.report_kind, &value.message)?;
    match &value.stack_trace {
        Some(trace) => {
            out.write_all(trace.as_bytes())?;
            out.flush()
        }
        None => print_stack_trace_to(config, out),
    }
}

/// Register the panic hook.
///
/// This function is used to register the panic hook and store the previous hook.
/// PRECONDITIONS:
///     None
/// SAFETY:
///     Handler functions are not guaranteed to be reentrant.
///     No other handler functions should be called concurrently.
/// ATOMICITY:
///     This function uses a swap on an atomic pointer.
pub fn register_panic_hook() -> anyhow::Result<()> {
    // register only once, if it is already registered, do nothing
    if !PREVIOUS_PANIC_HOOK.load(SeqCst).is_null() {
        return Ok(());
    }
    anyhow::ensure!(
        !std::thread::panicking(),
        "Cannot replace the panic hook while panicking"
    );

    let old_hook = panic::take_hook();
    let old_hook_ptr = Box::into_raw(Box::new(old_hook));
    PREVIOUS_PANIC_HOOK.swap(old_hook_ptr, SeqCst);
    panic::set_hook(Box::new(handle_panic));
    Ok(())
}

/// Puts back the hook that `register_panic_hook` replaced. Does nothing if ours is not
/// registered.
pub fn restore_panic_hook() {
    if std::thread::panicking() {
        return;
    }
    let old_hook_ptr = PREVIOUS_PANIC_HOOK.swap(ptr::null_mut(), SeqCst);
    if !old_hook_ptr.is_null() {
        // Safety: This pointer can only come from Box::into_raw in register_panic_hook.
        let old_hook = unsafe { Box::from_raw(old_hook_ptr) };
        panic::set_hook(*old_hook);
    }
}

// Runs before unwinding starts, while the panicking frames are still on the stack. A panic
// inside `catch_failure` only leaves its trace behind; any other one is reported as uncaught.
fn handle_panic(panic_info: &PanicHookInfo<'_>) {
    let value = classify_panic_payload(panic_info.payload());
    if inside_catch_failure() {
        if value.stack_trace.is_none() {
            let mut rendered = Vec::new();
            with_config(|config| {
                let _ = print_stack_trace_to(config, &mut rendered);
            });
            let rendered = String::from_utf8_lossy(&rendered).into_owned();
            let _ = LAST_PANIC_TRACE.try_with(|trace| {
                *trace.borrow_mut() = Some(rendered).filter(|s| !s.is_empty());
            });
        }
        return;
    }
    if claim_panic_report() {
        with_config(|config| {
            let _ = write_uncaught_report(&mut io::stderr().lock(), &value, config);
        });
    } else {
        call_previous_panic_hook(panic_info);
    }
}

/// Call the previous panic hook.
///
/// This function is used to call the previous panic hook.
/// PRECONDITIONS:
///     None
/// SAFETY:
///     Handler functions are not guaranteed to be reentrant.
///     No other handler functions should be called concurrently.
fn call_previous_panic_hook(panic_info: &PanicHookInfo<'_>) {
    let old_hook_ptr = PREVIOUS_PANIC_HOOK.load(SeqCst);
    if !old_hook_ptr.is_null() {
        // Safety: This pointer can only come from Box::into_raw above in register_panic_hook.
        // We borrow it here without taking ownership so it remains valid for future calls.
        unsafe {
            let old_hook = &*old_hook_ptr;
            old_hook(panic_info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash_info::FaultKind;

    fn classify(payload: Box<dyn Any + Send>) -> UncaughtValue {
        classify_panic_payload(payload.as_ref())
    }

    #[test]
    fn test_classify_primitives() {
        let value = classify(Box::new(3.14f64));
        assert_eq!(value.kind, "double");
        assert_eq!(value.report_kind, "A double exception");
        assert_eq!(value.message, "3.140000");

        assert_eq!(classify(Box::new(2.5f32)).message, "2.500000");
        assert_eq!(classify(Box::new(true)).kind, "bool");
        assert_eq!(classify(Box::new('x')).message, "x");
        assert_eq!(classify(Box::new(42i32)).kind, "int");
        assert_eq!(classify(Box::new(42i64)).kind, "long");
        assert_eq!(classify(Box::new(42i64)).report_kind, "A long exception");
    }

    #[test]
    fn test_classify_strings() {
        let value = classify(Box::new("boom"));
        assert_eq!(value.kind, "string");
        assert_eq!(value.message, "boom");
        let value = classify(Box::new("boom".to_string()));
        assert_eq!(value.report_kind, "A string exception");
        assert_eq!(value.message, "boom");
    }

    #[test]
    fn test_classify_errors() {
        let error: Box<dyn std::error::Error + Send + Sync> = "bad input".into();
        let value = classify(Box::new(error));
        assert_eq!(value.kind, "exception");
        assert_eq!(value.message, "bad input");

        let value = classify(Box::new(anyhow::anyhow!("inner").context("outer")));
        assert_eq!(value.kind, "exception");
        assert_eq!(value.message, "outer: inner");

        let error = LibraryError::new("index out of range").with_stack_trace("trace".to_string());
        let value = classify(Box::new(error));
        assert_eq!(value.kind, "error");
        assert_eq!(value.report_kind, LIBRARY_ERROR_REPORT_KIND);
        assert_eq!(value.stack_trace.as_deref(), Some("trace"));
    }

    #[test]
    fn test_classify_unknown() {
        struct Opaque;
        let value = classify(Box::new(Opaque));
        assert_eq!(value.kind, "unknown");
        assert_eq!(value.message, UNKNOWN_DETAILS);
    }

    #[test]
    fn test_failure_from_payload() {
        let failure = FailureDescriptor::from_fault(FaultKind::SIGFPE);
        assert_eq!(failure_from_payload(&failure.clone()), failure);

        let failure = failure_from_payload(&7i32);
        assert_eq!(failure.kind, "int");
        assert_eq!(failure.details, "7");
    }

    #[test]
    fn test_catch_failure() {
        assert_eq!(catch_failure(|| 5), Ok(5));

        let failure = catch_failure(|| std::panic::panic_any(3.14f64)).unwrap_err();
        assert_eq!(failure.kind, "double");
        assert_eq!(failure.details, "3.140000");

        let failure = catch_failure(|| {
            std::panic::panic_any(LibraryError::new("vector index out of range"))
        })
        .unwrap_err();
        assert_eq!(failure.kind, "error");
        assert_eq!(failure.details, "vector index out of range");
    }

    #[test]
    fn test_catch_depth_tracking() {
        assert!(!inside_catch_failure());
        let nested = catch_failure(|| {
            assert!(inside_catch_failure());
            catch_failure(inside_catch_failure)
        });
        assert_eq!(nested, Ok(Ok(true)));
        let _ = catch_failure(|| std::panic::panic_any(1i32));
        assert!(!inside_catch_failure());
    }

    #[test]
    fn test_uncaught_report_uses_carried_trace() {
        let mut value = UncaughtValue::new("error", LIBRARY_ERROR_REPORT_KIND, "oops");
        value.stack_trace = Some("*** Stack trace:\n*** main()\n".to_string());
        let mut out = Vec::new();
        write_uncaught_report(&mut out, &value, &DiagnosticsConfiguration::default()).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("*** A library error occurred during program execution:\n*** oops\n"));
        assert!(out.ends_with("*** Stack trace:\n*** main()\n"));
    }

    #[test]
    fn test_register_panic_hook() {
        register_panic_hook().unwrap();
        assert!(!PREVIOUS_PANIC_HOOK.load(SeqCst).is_null());
        restore_panic_hook();
        assert!(PREVIOUS_PANIC_HOOK.load(SeqCst).is_null());
    }
}
