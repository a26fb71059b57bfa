// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod filter;
mod formatter;
mod normalizer;

pub use filter::*;
pub use formatter::*;
pub use normalizer::*;
