// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::crash_handler::{claim_report, report_fault, save_crash_context};
use crate::crash_info::FaultKind;
use std::sync::Mutex;
use windows::Win32::Foundation::{
    EXCEPTION_ACCESS_VIOLATION, EXCEPTION_ARRAY_BOUNDS_EXCEEDED, EXCEPTION_FLT_DIVIDE_BY_ZERO,
    EXCEPTION_FLT_OVERFLOW, EXCEPTION_ILLEGAL_INSTRUCTION, EXCEPTION_INT_DIVIDE_BY_ZERO,
    EXCEPTION_INT_OVERFLOW, EXCEPTION_PRIV_INSTRUCTION, EXCEPTION_STACK_OVERFLOW, NTSTATUS,
};
use windows::Win32::System::Diagnostics::Debug::{
    SetErrorMode, SetUnhandledExceptionFilter, EXCEPTION_EXECUTE_HANDLER, EXCEPTION_POINTERS,
    LPTOP_LEVEL_EXCEPTION_FILTER, SEM_FAILCRITICALERRORS,
};

// `None` until the filter has been installed.
static PREVIOUS_FILTER: Mutex<Option<LPTOP_LEVEL_EXCEPTION_FILTER>> = Mutex::new(None);

/// Suppresses the system error dialogs and installs our unhandled exception filter, keeping the
/// one it replaces.
pub fn install_exception_filter() -> anyhow::Result<()> {
    let mut previous = PREVIOUS_FILTER
        .lock()
        .map_err(|_| anyhow::anyhow!("Exception filter state poisoned"))?;
    // SAFETY: both calls only swap process-wide settings.
    unsafe {
        SetErrorMode(SEM_FAILCRITICALERRORS);
        let handler: unsafe extern "system" fn(*const EXCEPTION_POINTERS) -> i32 =
            handle_unhandled_exception;
        let old = SetUnhandledExceptionFilter(Some(Some(handler)));
        if previous.is_none() {
            *previous = Some(old);
        }
    }
    Ok(())
}

/// Puts back the filter that `install_exception_filter` replaced.
pub fn restore_exception_filter() {
    if let Ok(mut previous) = PREVIOUS_FILTER.try_lock() {
        if let Some(old) = previous.take() {
            // SAFETY: `old` was returned by SetUnhandledExceptionFilter.
            unsafe {
                SetUnhandledExceptionFilter(Some(old));
            }
        }
    }
}

fn fault_from_exception_code(code: NTSTATUS) -> FaultKind {
    match code {
        EXCEPTION_STACK_OVERFLOW => FaultKind::StackOverflow,
        EXCEPTION_ACCESS_VIOLATION | EXCEPTION_ARRAY_BOUNDS_EXCEEDED => FaultKind::SIGSEGV,
        EXCEPTION_ILLEGAL_INSTRUCTION | EXCEPTION_PRIV_INSTRUCTION => FaultKind::SIGILL,
        EXCEPTION_INT_DIVIDE_BY_ZERO
        | EXCEPTION_INT_OVERFLOW
        | EXCEPTION_FLT_DIVIDE_BY_ZERO
        | EXCEPTION_FLT_OVERFLOW => FaultKind::SIGFPE,
        _ => FaultKind::UNKNOWN,
    }
}

unsafe extern "system" fn handle_unhandled_exception(
    exception_info: *const EXCEPTION_POINTERS,
) -> i32 {
    let mut fault = FaultKind::UNKNOWN;
    // SAFETY: Windows guarantees exception_info is valid during exception handling
    if !exception_info.is_null() {
        let exception_record = (*exception_info).ExceptionRecord;
        if !exception_record.is_null() {
            fault = fault_from_exception_code((*exception_record).ExceptionCode);
        }
        let context = (*exception_info).ContextRecord;
        if !context.is_null() {
            #[cfg(target_arch = "x86_64")]
            let ip = (*context).Rip as usize;
            #[cfg(target_arch = "x86")]
            let ip = (*context).Eip as usize;
            #[cfg(target_arch = "aarch64")]
            let ip = (*context).Pc as usize;
            save_crash_context(ip, fault == FaultKind::StackOverflow);
        }
    }
    if claim_report() {
        report_fault(fault);
    }
    EXCEPTION_EXECUTE_HANDLER
}
