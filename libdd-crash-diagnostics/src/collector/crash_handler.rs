// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::emitters::{emit_fault_report, print_stack_trace_to};
use super::unhandled_exception_handler::{register_panic_hook, restore_panic_hook};
use crate::crash_info::FaultKind;
use crate::shared::configuration::DiagnosticsConfiguration;
use std::io;
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize};
use tracing::debug;

// The configuration is read from inside the handlers, where locks are off limits, so it lives
// behind an `AtomicPtr`. It is either null or a pointer from `Box::into_raw()`.
static CONFIG: AtomicPtr<DiagnosticsConfiguration> = AtomicPtr::new(ptr::null_mut());

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Lets exactly one caller through for the life of the process.
pub(crate) struct ReportGuard(AtomicBool);

impl ReportGuard {
    pub(crate) const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Returns true for the first caller only.
    pub(crate) fn claim(&self) -> bool {
        !self.0.swap(true, SeqCst)
    }
}

// Faults and panics are guarded apart: a panic the program later catches must not use up the
// report of a fault that kills it.
static FAULT_REPORTED: ReportGuard = ReportGuard::new();
static PANIC_REPORTED: ReportGuard = ReportGuard::new();

// Filled in by the Windows exception filter. 0 means "nothing saved".
static SAVED_CRASH_IP: AtomicUsize = AtomicUsize::new(0);
static SAVED_CRASH_IS_STACK_OVERFLOW: AtomicBool = AtomicBool::new(false);

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Failed to register signal handlers: {0:#}")]
    SignalRegistration(anyhow::Error),
    #[error("Failed to install the unhandled exception filter: {0:#}")]
    ExceptionFilter(anyhow::Error),
    #[error("Failed to register the panic hook: {0:#}")]
    PanicHook(anyhow::Error),
}

/// Replaces the process-wide configuration used by the handlers.
///
/// PRECONDITIONS:
///     None
/// SAFETY:
///     Intended to be called at startup. A fault racing with this call may read the
///     configuration that is being freed.
/// ATOMICITY:
///     This function uses a swap on an atomic pointer.
pub fn update_config(config: DiagnosticsConfiguration) {
    let box_ptr = Box::into_raw(Box::new(config));
    let old = CONFIG.swap(box_ptr, SeqCst);
    if !old.is_null() {
        // Safety: This can only come from a box above.
        unsafe {
            std::mem::drop(Box::from_raw(old));
        }
    }
}

/// Runs `f` against the process-wide configuration, or the default one if none was installed.
pub fn with_config<R>(f: impl FnOnce(&DiagnosticsConfiguration) -> R) -> R {
    let config_ptr = CONFIG.load(SeqCst);
    if config_ptr.is_null() {
        f(&DiagnosticsConfiguration::default())
    } else {
        // Safety: non-null values only come from `update_config`.
        f(unsafe { &*config_ptr })
    }
}

pub fn current_config() -> DiagnosticsConfiguration {
    with_config(Clone::clone)
}

/// Records the executable handed to the symbolizer. Until this is called the path is empty and
/// symbolization yields nothing.
pub fn set_program_path_for_symbolization(program_path: impl Into<String>) {
    let mut config = current_config();
    config.set_program_path(program_path);
    update_config(config);
}

/// Uses `argv[0]` as the program path.
pub fn set_program_path_from_args() {
    if let Some(arg0) = std::env::args_os().next() {
        set_program_path_for_symbolization(arg0.to_string_lossy());
    }
}

/// Installs `config` process-wide and enables the top-level handler.
pub fn init(config: DiagnosticsConfiguration) -> Result<(), HandlerError> {
    update_config(config);
    set_top_level_handler_enabled(true, true)
}

/// Installs or removes the signal handlers (exception filter on Windows) and the panic hook.
/// Asking for the current state does nothing unless `force` is set, in which case the handlers
/// are removed and installed again.
///
/// SAFETY:
///     Handler functions are not guaranteed to be reentrant.
///     No other handler functions should be called concurrently.
pub fn set_top_level_handler_enabled(enabled: bool, force: bool) -> Result<(), HandlerError> {
    let currently_enabled = ENABLED.load(SeqCst);
    if enabled == currently_enabled && !force {
        return Ok(());
    }
    if currently_enabled {
        uninstall();
        ENABLED.store(false, SeqCst);
    }
    if enabled {
        install()?;
        ENABLED.store(true, SeqCst);
    }
    debug!(enabled, force, "Top-level crash handler updated");
    Ok(())
}

pub fn is_top_level_handler_enabled() -> bool {
    ENABLED.load(SeqCst)
}

fn install() -> Result<(), HandlerError> {
    #[cfg(unix)]
    with_config(super::signal_handler_manager::register_signal_handlers)
        .map_err(HandlerError::SignalRegistration)?;
    #[cfg(windows)]
    super::exception_filter_windows::install_exception_filter()
        .map_err(HandlerError::ExceptionFilter)?;
    if let Err(e) = register_panic_hook() {
        uninstall();
        return Err(HandlerError::PanicHook(e));
    }
    Ok(())
}

fn uninstall() {
    #[cfg(unix)]
    super::signal_handler_manager::restore_previous_handlers();
    #[cfg(windows)]
    super::exception_filter_windows::restore_exception_filter();
    restore_panic_hook();
}

/// Records where a fault happened. Only the Windows exception filter knows this.
pub fn save_crash_context(ip: usize, stack_overflow: bool) {
    SAVED_CRASH_IP.store(ip, SeqCst);
    SAVED_CRASH_IS_STACK_OVERFLOW.store(stack_overflow, SeqCst);
}

pub fn saved_crash_ip() -> Option<usize> {
    match SAVED_CRASH_IP.load(SeqCst) {
        0 => None,
        ip => Some(ip),
    }
}

pub fn saved_crash_is_stack_overflow() -> bool {
    SAVED_CRASH_IS_STACK_OVERFLOW.load(SeqCst)
}

/// Returns true for the first fault in the process only.
pub(crate) fn claim_report() -> bool {
    FAULT_REPORTED.claim()
}

/// Returns true for the first uncaught panic in the process only.
pub(crate) fn claim_panic_report() -> bool {
    PANIC_REPORTED.claim()
}

/// Writes the fault report to stderr. Write failures are dropped: there is nowhere left to
/// report them.
pub(crate) fn report_fault(fault: FaultKind) {
    with_config(|config| {
        let mut stderr = io::stderr().lock();
        let _ = emit_fault_report(&mut stderr, fault, config);
    });
}

/// Prints the calling thread's stack trace to stderr using the process-wide configuration.
pub fn print_stack_trace() -> io::Result<()> {
    with_config(|config| print_stack_trace_to(config, &mut io::stderr().lock()))
}

#[cfg(unix)]
pub(crate) use unix::handle_posix_sigaction;

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::collector::signal_handler_manager::{
        is_ignored, reset_to_default, restore_previous_handlers,
    };
    use crate::crash_info::FailureDescriptor;
    use crate::shared::configuration::ExecutionMode;
    use libc::{c_int, c_void, siginfo_t};

    // Unwinding out of this handler is how unattended mode hands the fault to `catch_failure`,
    // hence the "C-unwind" ABI.
    pub(crate) extern "C-unwind" fn handle_posix_sigaction(
        signum: c_int,
        _sig_info: *mut siginfo_t,
        _ucontext: *mut c_void,
    ) {
        let fault = FaultKind::from_signum(signum);
        match with_config(|config| config.mode()) {
            ExecutionMode::Unattended => {
                let mut rendered = Vec::new();
                with_config(|config| {
                    let _ = print_stack_trace_to(config, &mut rendered);
                });
                let stack_trace =
                    Some(String::from_utf8_lossy(&rendered).into_owned()).filter(|s| !s.is_empty());
                std::panic::panic_any(FailureDescriptor::from_fault(fault).with_stack_trace(stack_trace));
            }
            ExecutionMode::Normal => {
                restore_previous_handlers();
                if claim_report() {
                    report_fault(fault);
                }
                reraise(fault.reraise_signum(signum));
            }
        }
    }

    /// Delivers `signum` to whatever handler is now installed. A previous handler may return
    /// without terminating (Rust's own SIGSEGV handler does, for faults outside a guard page),
    /// in which case the default action is forced.
    fn reraise(signum: c_int) {
        if is_ignored(signum) {
            return;
        }
        // SAFETY: raise is async-signal-safe.
        unsafe { libc::raise(signum) };
        reset_to_default(signum);
        // SAFETY: as above.
        unsafe { libc::raise(signum) };
    }
}
