// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Small program that misbehaves on request, used by the integration tests to observe real
//! signal deaths and panic reports.
//!
//! Usage: `crash-diagnostics-test-bin <mode>` where mode is one of `segfault`, `abort`,
//! `panic-double`, `library-error`, `caught-panic-then-segfault`, `unattended-panic`,
//! `unattended-signal` or `print-trace`.

#![allow(clippy::approx_constant)]

use anyhow::Context;
use libdd_crash_diagnostics::{self as diagnostics, DiagnosticsConfiguration, ExecutionMode};
use std::env;

#[inline(never)]
fn level_three(mode: &str) {
    match mode {
        "segfault" => segfault(),
        "caught-panic-then-segfault" => {
            let _ = std::panic::catch_unwind(|| panic!("handled"));
            segfault();
        }
        "abort" => std::process::abort(),
        "panic-double" => std::panic::panic_any(3.14f64),
        "library-error" => diagnostics::raise_error("vector index out of range"),
        "print-trace" => {
            let _ = diagnostics::print_stack_trace();
        }
        #[cfg(unix)]
        "unattended-signal" => {
            // SAFETY: the handler installed by `init` turns the signal into a panic.
            unsafe { libc::raise(libc::SIGSEGV) };
        }
        _ => {}
    }
}

#[inline(never)]
fn level_two(mode: &str) {
    level_three(mode)
}

#[inline(never)]
fn level_one(mode: &str) {
    level_two(mode)
}

#[inline(never)]
fn segfault() {
    // SAFETY: deliberately faults.
    unsafe {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        std::arch::asm!("mov eax, [0]", options(nostack));

        #[cfg(target_arch = "aarch64")]
        std::arch::asm!("mov x0, #0", "ldr x1, [x0]", options(nostack));

        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
        libc::raise(libc::SIGSEGV);
    }
}

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let mode = args.next().context("Unexpected number of arguments")?;
    anyhow::ensure!(args.next().is_none(), "unexpected extra arguments");

    let mut config = DiagnosticsConfiguration::from_env();
    let unattended = mode.starts_with("unattended-");
    if unattended {
        config.set_mode(ExecutionMode::Unattended);
    }
    diagnostics::init(config)?;
    diagnostics::set_program_path_from_args();

    if unattended {
        let scenario = if mode == "unattended-panic" {
            "panic-double"
        } else {
            mode.as_str()
        };
        match diagnostics::catch_failure(|| level_one(scenario)) {
            Ok(()) => println!("null"),
            Err(failure) => println!("{}", serde_json::to_string(&failure)?),
        }
        return Ok(());
    }

    level_one(&mode);
    Ok(())
}
