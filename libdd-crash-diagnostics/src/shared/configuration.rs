// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::shared::constants;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How a fault is surfaced once it has been caught.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Print the report to stderr and let the original signal kill the process.
    Normal,
    /// Turn the fault into a `FailureDescriptor` that `catch_failure` hands back to the caller.
    /// Used when the program runs under an automated harness.
    Unattended,
}

impl ExecutionMode {
    /// The mode selected at build time through the `unattended` feature.
    pub const fn from_build() -> Self {
        if cfg!(feature = "unattended") {
            ExecutionMode::Unattended
        } else {
            ExecutionMode::Normal
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(ExecutionMode::Normal),
            "unattended" => Some(ExecutionMode::Unattended),
            _ => None,
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::from_build()
    }
}

/// The signals handled when the configuration does not name any.
/// An unattended harness kills runaway tests with SIGINT, so that mode catches it instead of
/// SIGABRT.
pub fn default_signals(mode: ExecutionMode) -> Vec<i32> {
    match mode {
        ExecutionMode::Normal => vec![libc::SIGSEGV, libc::SIGILL, libc::SIGFPE, libc::SIGABRT],
        ExecutionMode::Unattended => vec![libc::SIGSEGV, libc::SIGILL, libc::SIGFPE, libc::SIGINT],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsConfiguration {
    create_alt_stack: bool,
    filtering_enabled: bool,
    mode: ExecutionMode,
    // Passed to the symbolizer. Left empty, symbolization quietly yields nothing.
    program_path: String,
    show_header_footer_bars: bool,
    // None means "the defaults for `mode`"
    signals: Option<Vec<i32>>,
    symbolizer_path: Option<String>,
    use_alt_stack: bool,
}

impl Default for DiagnosticsConfiguration {
    fn default() -> Self {
        Self {
            create_alt_stack: false,
            filtering_enabled: true,
            mode: ExecutionMode::default(),
            program_path: String::new(),
            show_header_footer_bars: false,
            signals: None,
            symbolizer_path: None,
            use_alt_stack: false,
        }
    }
}

impl DiagnosticsConfiguration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        create_alt_stack: bool,
        use_alt_stack: bool,
        filtering_enabled: bool,
        show_header_footer_bars: bool,
        mode: ExecutionMode,
        program_path: String,
        signals: Vec<i32>,
        symbolizer_path: Option<String>,
    ) -> anyhow::Result<Self> {
        // Requesting to create, but not use, the altstack is considered paradoxical.
        anyhow::ensure!(
            !create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        let signals = if signals.is_empty() {
            None
        } else {
            Some(validate_signals(signals)?)
        };
        Ok(Self {
            create_alt_stack,
            filtering_enabled,
            mode,
            program_path,
            show_header_footer_bars,
            signals,
            symbolizer_path,
            use_alt_stack,
        })
    }

    /// Builds the default configuration, then applies any `DD_CRASH_DIAGNOSTICS_*` overrides
    /// found in the environment. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(filtering) = env_flag(constants::ENV_FILTER) {
            config.filtering_enabled = filtering;
        }
        if let Some(bars) = env_flag(constants::ENV_BARS) {
            config.show_header_footer_bars = bars;
        }
        if let Ok(value) = std::env::var(constants::ENV_MODE) {
            match ExecutionMode::parse(&value) {
                Some(mode) => config.mode = mode,
                None => warn!(
                    variable = constants::ENV_MODE,
                    value, "Ignoring unknown execution mode"
                ),
            }
        }
        if let Ok(path) = std::env::var(constants::ENV_SYMBOLIZER) {
            if !path.is_empty() {
                config.symbolizer_path = Some(path);
            }
        }
        config
    }

    pub fn create_alt_stack(&self) -> bool {
        self.create_alt_stack
    }

    pub fn use_alt_stack(&self) -> bool {
        self.use_alt_stack
    }

    pub fn filtering_enabled(&self) -> bool {
        self.filtering_enabled
    }

    pub fn show_header_footer_bars(&self) -> bool {
        self.show_header_footer_bars
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn program_path(&self) -> &str {
        &self.program_path
    }

    pub fn signals(&self) -> Vec<i32> {
        match &self.signals {
            Some(signals) => signals.clone(),
            None => default_signals(self.mode),
        }
    }

    pub fn symbolizer_path(&self) -> Option<&str> {
        self.symbolizer_path.as_deref()
    }

    pub fn set_create_alt_stack(&mut self, create_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !create_alt_stack || self.use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.create_alt_stack = create_alt_stack;
        Ok(())
    }

    pub fn set_use_alt_stack(&mut self, use_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.use_alt_stack = use_alt_stack;
        Ok(())
    }

    pub fn set_filtering_enabled(&mut self, filtering_enabled: bool) {
        self.filtering_enabled = filtering_enabled;
    }

    pub fn set_show_header_footer_bars(&mut self, show_header_footer_bars: bool) {
        self.show_header_footer_bars = show_header_footer_bars;
    }

    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    pub fn set_program_path(&mut self, program_path: impl Into<String>) {
        self.program_path = program_path.into();
    }

    /// An empty list restores the defaults for the current mode.
    pub fn set_signals(&mut self, signals: Vec<i32>) -> anyhow::Result<()> {
        self.signals = if signals.is_empty() {
            None
        } else {
            Some(validate_signals(signals)?)
        };
        Ok(())
    }

    pub fn set_symbolizer_path(&mut self, symbolizer_path: Option<String>) {
        self.symbolizer_path = symbolizer_path;
    }
}

fn validate_signals(mut signals: Vec<i32>) -> anyhow::Result<Vec<i32>> {
    // Ensure we don't have double elements in the signals list.
    let before_len = signals.len();
    signals.sort();
    signals.dedup();
    anyhow::ensure!(
        before_len == signals.len(),
        "Signals contained duplicate elements"
    );
    #[cfg(unix)]
    signals
        .iter()
        .try_for_each(|x| crate::signal_from_signum(*x).map(|_| ()))?;
    #[cfg(not(unix))]
    anyhow::ensure!(
        signals.iter().all(|x| *x > 0),
        "Signal numbers must be positive"
    );
    Ok(signals)
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(variable = name, value, "Ignoring unparseable boolean");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DiagnosticsConfiguration::default();
        assert!(config.filtering_enabled());
        assert!(!config.show_header_footer_bars());
        assert!(!config.create_alt_stack());
        assert!(!config.use_alt_stack());
        assert_eq!(config.program_path(), "");
        assert_eq!(config.symbolizer_path(), None);
        assert_eq!(config.signals(), default_signals(config.mode()));
    }

    #[test]
    fn test_default_signals_follow_mode() {
        let mut config = DiagnosticsConfiguration::default();
        config.set_mode(ExecutionMode::Normal);
        assert!(config.signals().contains(&libc::SIGABRT));
        assert!(!config.signals().contains(&libc::SIGINT));

        config.set_mode(ExecutionMode::Unattended);
        assert!(config.signals().contains(&libc::SIGINT));
        assert!(!config.signals().contains(&libc::SIGABRT));
    }

    #[test]
    fn test_alt_stack_must_be_used_if_created() {
        let err = DiagnosticsConfiguration::new(
            true,
            false,
            true,
            false,
            ExecutionMode::Normal,
            String::new(),
            vec![],
            None,
        );
        assert!(err.is_err());

        let mut config = DiagnosticsConfiguration::default();
        assert!(config.set_create_alt_stack(true).is_err());
        config.set_use_alt_stack(true).unwrap();
        config.set_create_alt_stack(true).unwrap();
        assert!(config.set_use_alt_stack(false).is_err());
    }

    #[test]
    fn test_duplicate_signals_rejected() {
        let mut config = DiagnosticsConfiguration::default();
        let err = config.set_signals(vec![libc::SIGSEGV, libc::SIGSEGV]);
        assert!(err.is_err());

        config
            .set_signals(vec![libc::SIGFPE, libc::SIGSEGV])
            .unwrap();
        let mut expected = vec![libc::SIGFPE, libc::SIGSEGV];
        expected.sort();
        assert_eq!(config.signals(), expected);

        config.set_signals(vec![]).unwrap();
        assert_eq!(config.signals(), default_signals(config.mode()));
    }

    #[test]
    #[cfg(unix)]
    fn test_invalid_signal_rejected() {
        let mut config = DiagnosticsConfiguration::default();
        assert!(config.set_signals(vec![9999]).is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(ExecutionMode::parse("Normal"), Some(ExecutionMode::Normal));
        assert_eq!(
            ExecutionMode::parse(" unattended "),
            Some(ExecutionMode::Unattended)
        );
        assert_eq!(ExecutionMode::parse("autograder"), None);
    }

    #[test]
    fn test_from_env() {
        // Only this test touches these variables.
        std::env::set_var(constants::ENV_FILTER, "0");
        std::env::set_var(constants::ENV_BARS, "true");
        std::env::set_var(constants::ENV_MODE, "unattended");
        std::env::set_var(constants::ENV_SYMBOLIZER, "/opt/bin/addr2line");
        let config = DiagnosticsConfiguration::from_env();
        assert!(!config.filtering_enabled());
        assert!(config.show_header_footer_bars());
        assert_eq!(config.mode(), ExecutionMode::Unattended);
        assert_eq!(config.symbolizer_path(), Some("/opt/bin/addr2line"));

        std::env::set_var(constants::ENV_FILTER, "maybe");
        std::env::set_var(constants::ENV_MODE, "sometimes");
        let config = DiagnosticsConfiguration::from_env();
        assert!(config.filtering_enabled());
        assert_eq!(config.mode(), ExecutionMode::default());

        for name in [
            constants::ENV_FILTER,
            constants::ENV_BARS,
            constants::ENV_MODE,
            constants::ENV_SYMBOLIZER,
        ] {
            std::env::remove_var(name);
        }
    }
}
