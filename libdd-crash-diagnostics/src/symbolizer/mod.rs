// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod reconciler;
mod runner;

pub use reconciler::*;
pub use runner::*;
