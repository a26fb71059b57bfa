// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::shared::constants::UNKNOWN_FUNCTION;
use serde::{Deserialize, Serialize};
use symbolic_common::Name;
use symbolic_demangle::{Demangle, DemangleOptions};

/// Frames of one captured call stack, innermost first.
/// Later stages annotate or hide frames but never reorder them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StackTrace {
    pub frames: Vec<StackFrame>,
}

impl StackTrace {
    pub fn empty() -> Self {
        Self { frames: vec![] }
    }

    pub fn from_frames(frames: Vec<StackFrame>) -> Self {
        Self { frames }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StackFrame> {
        self.frames.iter()
    }

    pub fn demangle_names(&mut self) {
        for frame in &mut self.frames {
            frame.demangle_name();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StackFrame {
    // Debug Info
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    /// 0 when unknown.
    #[serde(default)]
    pub line: u32,
    /// Raw `file:line` location reported by the symbolizer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub line_str: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function: String,

    // Absolute and module-relative instruction pointers
    pub address: usize,
    pub address2: usize,
}

impl StackFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(address: usize, address2: usize) -> Self {
        Self {
            address,
            address2,
            function: UNKNOWN_FUNCTION.to_string(),
            ..Self::default()
        }
    }

    /// Records a symbolizer location. When its last `:`-separated token is an integer it becomes
    /// `line`, and whatever precedes it becomes `file`.
    pub fn set_location(&mut self, location: impl Into<String>) {
        self.line_str = location.into();
        if let Some((file, line)) = split_location(&self.line_str) {
            self.line = line;
            if !file.is_empty() {
                self.file = file.to_string();
            }
        }
    }

    /// `line`, or the line number embedded in `line_str` when `line` was never filled in.
    pub fn resolved_line(&self) -> u32 {
        if self.line == 0 {
            if let Some((_, line)) = split_location(&self.line_str) {
                return line;
            }
        }
        self.line
    }

    pub fn has_unknown_function(&self) -> bool {
        self.function.is_empty() || self.function == UNKNOWN_FUNCTION
    }

    pub fn demangle_name(&mut self) {
        if self.function.is_empty() {
            return;
        }
        if let Some(demangled) = demangle(&self.function) {
            self.function = demangled;
        }
    }
}

/// Demangles Itanium, Rust and MSVC symbols. Returns `None` for names that are not mangled.
pub fn demangle(name: &str) -> Option<String> {
    let attempt = |candidate: &str| match Name::from(candidate).demangle(DemangleOptions::name_only())
    {
        Some(demangled) if demangled != candidate => Some(demangled),
        _ => None,
    };
    if name.starts_with("_Z") || name.starts_with("_R") || name.starts_with('?') {
        return attempt(name);
    }
    // Some Windows toolchains hand back Itanium names with the leading underscore eaten.
    if name.starts_with("ZN") || name.starts_with("ZL") {
        return attempt(&format!("_{name}"));
    }
    None
}

fn split_location(location: &str) -> Option<(&str, u32)> {
    let (file, line) = location.rsplit_once(':')?;
    let line = line.trim().parse::<u32>().ok()?;
    Some((file, line))
}
