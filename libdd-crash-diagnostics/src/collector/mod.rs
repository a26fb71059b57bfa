// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
mod capture;
#[cfg(unix)]
mod capture_posix;
#[cfg(windows)]
mod capture_windows;
mod crash_handler;
mod emitters;
#[cfg(windows)]
mod exception_filter_windows;
#[cfg(unix)]
mod signal_handler_manager;
mod unhandled_exception_handler;

pub use capture::{platform_capturer, StackCapturer};
#[cfg(unix)]
pub use capture_posix::PosixCapturer;
#[cfg(windows)]
pub use capture_windows::WindowsCapturer;
pub use crash_handler::{
    current_config, init, is_top_level_handler_enabled, print_stack_trace, save_crash_context,
    saved_crash_ip, saved_crash_is_stack_overflow, set_program_path_for_symbolization,
    set_program_path_from_args, set_top_level_handler_enabled, update_config, with_config,
    HandlerError,
};
pub use emitters::{
    capture_stack_trace, emit_banner, emit_fault_report, insert_stars_before_each_line,
    print_stack_trace_to,
};
pub use unhandled_exception_handler::{
    catch_failure, classify_panic_payload, failure_from_payload, write_uncaught_report,
    UncaughtValue, LIBRARY_ERROR_REPORT_KIND,
};
