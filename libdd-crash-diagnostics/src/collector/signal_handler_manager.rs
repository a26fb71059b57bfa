// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::crash_handler::handle_posix_sigaction;
use crate::shared::configuration::DiagnosticsConfiguration;
use crate::signal_from_signum;
use libc::{
    c_int, mmap, sigaltstack, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE,
    SA_NODEFER, SA_ONSTACK, SA_SIGINFO, SIGSTKSZ, SIG_DFL, SIG_IGN,
};
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Mutex;
use tracing::debug;

// Linux seems to have the most, supporting up to 64 inclusive
// https://man7.org/linux/man-pages/man7/signal.7.html
const MAX_SIGNALS: usize = 65;

// The handlers that were in place before ours, restored when we are disabled or when a fault is
// being reported. Only one generation is kept.
static PREVIOUS_HANDLERS: Mutex<Vec<(c_int, libc::sigaction)>> = Mutex::new(Vec::new());
static ALT_STACK_CREATED: AtomicBool = AtomicBool::new(false);

/// Installs our handler for every configured signal and remembers the handlers it replaces.
/// If any registration fails, the ones already made are rolled back.
///
/// SAFETY:
///     Handler functions are not guaranteed to be reentrant.
///     No other handler-management functions should be called concurrently.
/// ATOMICITY:
///     A fault arriving while this runs may find our handler installed before the previous one
///     has been stored. The fault path then falls back to the default action.
pub fn register_signal_handlers(config: &DiagnosticsConfiguration) -> anyhow::Result<()> {
    let signals = config.signals();
    for signum in &signals {
        anyhow::ensure!(
            *signum >= 0 && *signum < MAX_SIGNALS as i32,
            "Signal number {signum} out of range"
        );
    }

    if config.create_alt_stack() && !ALT_STACK_CREATED.swap(true, SeqCst) {
        // Safety: This function has no documented preconditions.
        if let Err(e) = unsafe { create_alt_stack() } {
            ALT_STACK_CREATED.store(false, SeqCst);
            return Err(e);
        }
    }

    let mut previous = Vec::with_capacity(signals.len());
    for signum in signals {
        // Safety: This function has no documented preconditions.
        match unsafe { register_signal_handler(signum, config.use_alt_stack()) } {
            Ok(old) => previous.push((signum, old)),
            Err(e) => {
                // Safety: each entry was returned by `sigaction` above.
                unsafe { restore(&previous) };
                return Err(e.context(format!("Unable to register signal handler for {signum}")));
            }
        }
    }
    debug!(count = previous.len(), "Registered crash diagnostics signal handlers");

    match PREVIOUS_HANDLERS.lock() {
        Ok(mut guard) => *guard = previous,
        Err(poisoned) => *poisoned.into_inner() = previous,
    }
    Ok(())
}

/// Puts back the handlers that `register_signal_handlers` replaced.
/// Safe to call from the fault path: it never blocks, and does nothing if the list is busy.
pub fn restore_previous_handlers() {
    if let Ok(mut guard) = PREVIOUS_HANDLERS.try_lock() {
        let previous = std::mem::take(&mut *guard);
        // Safety: each entry was returned by `sigaction` during registration.
        unsafe { restore(&previous) };
    }
}

/// True if the handler currently installed for `signum` ignores it.
pub(crate) fn is_ignored(signum: c_int) -> bool {
    // SAFETY: a null new action only queries the current one.
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    let rval = unsafe { libc::sigaction(signum, ptr::null(), &mut current) };
    rval == 0 && current.sa_sigaction == SIG_IGN
}

/// Installs the default disposition for `signum`.
pub(crate) fn reset_to_default(signum: c_int) {
    // SAFETY: SIG_DFL with an empty mask is always a valid action.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = SIG_DFL;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signum, &action, ptr::null_mut());
    }
}

unsafe fn restore(previous: &[(c_int, libc::sigaction)]) {
    for (signum, action) in previous {
        libc::sigaction(*signum, action, ptr::null_mut());
    }
}

/// Allocates a signal altstack, and puts a guard page at the end.
/// Inspired by https://github.com/rust-lang/rust/pull/69969/files
unsafe fn create_alt_stack() -> anyhow::Result<()> {
    // The greater of 16 pages or SIGSTKSZ: capturing and symbolizing a trace needs more than the
    // default 8KB.
    let page_size = page_size::get();
    let sigalstack_base_size = std::cmp::max(SIGSTKSZ, 16 * page_size);
    let stackp = mmap(
        ptr::null_mut(),
        sigalstack_base_size + page_size,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANON,
        -1,
        0,
    );
    anyhow::ensure!(
        stackp != MAP_FAILED,
        "failed to allocate an alternative stack"
    );
    let guard_result = libc::mprotect(stackp, page_size, PROT_NONE);
    anyhow::ensure!(
        guard_result == 0,
        "failed to set up alternative stack guard page"
    );
    let stackp = stackp.add(page_size);

    let stack = libc::stack_t {
        ss_sp: stackp,
        ss_flags: 0,
        ss_size: sigalstack_base_size,
    };
    let rval = sigaltstack(&stack, ptr::null_mut());
    anyhow::ensure!(rval == 0, "sigaltstack failed {rval}");
    Ok(())
}

unsafe fn register_signal_handler(
    signum: c_int,
    use_alt_stack: bool,
) -> anyhow::Result<libc::sigaction> {
    signal_from_signum(signum)?;

    // SA_NODEFER lets a fault inside the report reach the handler again, where the one-shot
    // guard turns it into a plain re-raise.
    let mut flags = SA_SIGINFO | SA_NODEFER;
    if use_alt_stack {
        flags |= SA_ONSTACK;
    }

    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = handle_posix_sigaction as usize;
    action.sa_flags = flags;
    libc::sigemptyset(&mut action.sa_mask);

    let mut old: libc::sigaction = std::mem::zeroed();
    let rval = libc::sigaction(signum, &action, &mut old);
    anyhow::ensure!(
        rval == 0,
        "sigaction failed: {}",
        std::io::Error::last_os_error()
    );
    Ok(old)
}
