// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod failure;
mod sig_info;
mod stacktrace;

pub use failure::*;
pub use sig_info::*;
pub use stacktrace::*;
