// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Crash diagnostics: readable stack traces when a program dies.
//!
//! Once enabled, the top-level handler catches fatal signals (SIGSEGV, SIGILL, SIGFPE and SIGABRT
//! by default; an unhandled exception filter on Windows) and panics that escape to the runtime.
//! For each it prints a short report to stderr:
//!
//! ```text
//! ***
//! *** CRASH DIAGNOSTICS
//! *** A segmentation fault (SIGSEGV) occurred during program execution:
//! *** This typically happens when you try to dereference a pointer that is null or invalid.
//! ***
//!
//! *** Stack trace (line numbers are approximate):
//! *** main.rs:12  level_three()
//! *** main.rs:7   level_two()
//! *** main.rs:3   main()
//! ***
//! *** To learn more about the crash, we strongly
//! *** suggest running your program under the debugger.
//! ***
//! ```
//!
//! The trace is built in stages:
//! 1. The stack is unwound in-process (`collector`), and each address is named with what the
//!    dynamic loader knows.
//! 2. Every frame is handed, twice (absolute address and module offset), to an external
//!    symbolizer (`atos` or `addr2line`) and the better of the two answers is kept
//!    (`symbolizer`).
//! 3. Function names are cleaned up, runtime and library frames are hidden, and the frames are
//!    laid out in aligned columns up to the program's entry point (`presentation`).
//!
//! In unattended mode (see [`ExecutionMode`]) faults are not fatal: they become a
//! [`FailureDescriptor`] that [`catch_failure`] hands back, so a test harness can record the
//! failure and keep going.
//!
//! Handler installation is not thread safe, and only the first fault in a process is reported.

mod collector;
mod crash_info;
mod presentation;
mod shared;
mod symbolizer;

pub use collector::*;
pub use crash_info::*;
pub use presentation::*;
pub use shared::configuration::*;
pub use shared::constants;
pub use symbolizer::*;
