// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs the platform's address-to-line helper once per stack and captures what it prints.

use crate::shared::configuration::DiagnosticsConfiguration;
use std::fmt::Write as _;
use std::io::{self, Read};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

/// Status reported when the helper could not be run at all.
pub const SYMBOLIZER_SPAWN_FAILED: i32 = -1;

#[derive(Debug, Error)]
pub enum SymbolizerError {
    #[error("Failed to spawn symbolizer {executable}: {source}")]
    Spawn {
        executable: String,
        source: io::Error,
    },
    #[error("Failed to collect symbolizer output: {0}")]
    Io(#[from] io::Error),
}

/// Which helper is used, and therefore which output convention applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolizerFamily {
    /// macOS `atos`: `func (in module) (file:line)`.
    Atos,
    /// GNU `addr2line -p`: `func at /path/file:line`.
    Addr2line,
    /// A Windows build of `addr2line`, same output as above.
    Addr2lineExe,
}

impl SymbolizerFamily {
    pub const fn for_this_platform() -> Self {
        if cfg!(target_os = "macos") {
            SymbolizerFamily::Atos
        } else if cfg!(windows) {
            SymbolizerFamily::Addr2lineExe
        } else {
            SymbolizerFamily::Addr2line
        }
    }

    pub fn default_executable(self) -> &'static str {
        match self {
            SymbolizerFamily::Atos => "atos",
            SymbolizerFamily::Addr2line => "addr2line",
            SymbolizerFamily::Addr2lineExe => {
                if cfg!(target_pointer_width = "64") {
                    "addr2line64.exe"
                } else {
                    "addr2line.exe"
                }
            }
        }
    }

    /// Whether the output uses the `func at file:line` convention.
    pub fn uses_at_separator(self) -> bool {
        !matches!(self, SymbolizerFamily::Atos)
    }
}

/// What the helper printed on stdout and stderr, interleaved as it wrote them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolizerOutput {
    pub status: i32,
    pub text: String,
}

impl SymbolizerOutput {
    pub fn failed() -> Self {
        Self {
            status: SYMBOLIZER_SPAWN_FAILED,
            text: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSymbolizer {
    executable: String,
    family: SymbolizerFamily,
    program_path: String,
}

impl ExternalSymbolizer {
    pub fn new(family: SymbolizerFamily, program_path: impl Into<String>) -> Self {
        Self {
            executable: family.default_executable().to_string(),
            family,
            program_path: program_path.into(),
        }
    }

    pub fn for_config(config: &DiagnosticsConfiguration) -> Self {
        let symbolizer = Self::new(SymbolizerFamily::for_this_platform(), config.program_path());
        match config.symbolizer_path() {
            Some(path) => symbolizer.with_executable(path),
            None => symbolizer,
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn family(&self) -> SymbolizerFamily {
        self.family
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// Arguments passed to the helper. Addresses are lowercase hex without a `0x` prefix.
    pub fn args(&self, addresses: &[usize]) -> Vec<String> {
        let mut args: Vec<String> = match self.family {
            SymbolizerFamily::Atos => vec!["-o".to_string(), self.program_path.clone()],
            SymbolizerFamily::Addr2line | SymbolizerFamily::Addr2lineExe => {
                ["-f", "-i", "-C", "-s", "-p", "-e"]
                    .iter()
                    .map(|s| s.to_string())
                    .chain(std::iter::once(self.program_path.clone()))
                    .collect()
            }
        };
        args.extend(addresses.iter().map(|addr| format!("{addr:x}")));
        args
    }

    /// The command as a shell would show it. Only used for logging.
    pub fn command_line(&self, addresses: &[usize]) -> String {
        let mut line = self.executable.clone();
        for arg in self.args(addresses) {
            if arg == self.program_path && self.family.uses_at_separator() {
                let _ = write!(line, " \"{arg}\"");
            } else {
                let _ = write!(line, " {arg}");
            }
        }
        line
    }

    /// Runs the helper on `addresses`. Never fails: a helper that cannot be started yields a
    /// nonzero status and empty text.
    pub fn run(&self, addresses: &[usize]) -> SymbolizerOutput {
        debug!(command = %self.command_line(addresses), "Running symbolizer");
        match self.try_run(addresses) {
            Ok(output) => {
                if !output.is_success() {
                    debug!(status = output.status, "Symbolizer exited with an error");
                }
                output
            }
            Err(e) => {
                warn!("{e}");
                SymbolizerOutput::failed()
            }
        }
    }

    pub fn try_run(&self, addresses: &[usize]) -> Result<SymbolizerOutput, SymbolizerError> {
        spawn_and_capture(&self.executable, &self.args(addresses))
    }
}

/// Both stdout and stderr go into a single pipe so the text keeps the order the helper wrote
/// it in.
#[cfg(unix)]
fn spawn_and_capture(executable: &str, args: &[String]) -> Result<SymbolizerOutput, SymbolizerError> {
    use std::fs::File;
    use std::os::fd::{FromRawFd, OwnedFd};
    use std::os::unix::process::ExitStatusExt;

    let mut fds: [libc::c_int; 2] = [0; 2];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by nobody else.
    let (reader, writer) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in fds {
        // SAFETY: fd is an open descriptor owned above.
        unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    }
    let writer_for_stderr = writer.try_clone()?;

    let mut child = {
        let mut command = Command::new(executable);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(writer_for_stderr));
        // `command` owns our copies of the write end. They must be closed before reading, or
        // the read below never sees end of file.
        command.spawn().map_err(|source| SymbolizerError::Spawn {
            executable: executable.to_string(),
            source,
        })?
    };

    let mut raw = Vec::new();
    File::from(reader).read_to_end(&mut raw)?;
    let status = child.wait()?;
    let status = status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(SYMBOLIZER_SPAWN_FAILED);
    Ok(SymbolizerOutput {
        status,
        text: String::from_utf8_lossy(&raw).into_owned(),
    })
}

#[cfg(not(unix))]
fn spawn_and_capture(executable: &str, args: &[String]) -> Result<SymbolizerOutput, SymbolizerError> {
    let output = Command::new(executable)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| SymbolizerError::Spawn {
            executable: executable.to_string(),
            source,
        })?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(SymbolizerOutput {
        status: output.status.code().unwrap_or(SYMBOLIZER_SPAWN_FAILED),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr2line_args() {
        let symbolizer = ExternalSymbolizer::new(SymbolizerFamily::Addr2line, "/tmp/prog");
        assert_eq!(
            symbolizer.args(&[0x4005d0, 0x5d0]),
            vec!["-f", "-i", "-C", "-s", "-p", "-e", "/tmp/prog", "4005d0", "5d0"]
        );
        assert_eq!(
            symbolizer.command_line(&[0xABC]),
            "addr2line -f -i -C -s -p -e \"/tmp/prog\" abc"
        );
    }

    #[test]
    fn test_atos_args() {
        let symbolizer = ExternalSymbolizer::new(SymbolizerFamily::Atos, "/tmp/prog");
        assert_eq!(
            symbolizer.args(&[0x100003f50]),
            vec!["-o", "/tmp/prog", "100003f50"]
        );
        assert_eq!(
            symbolizer.command_line(&[0x10]),
            "atos -o /tmp/prog 10"
        );
    }

    #[test]
    fn test_executable_override() {
        let mut config = DiagnosticsConfiguration::default();
        config.set_program_path("/bin/prog");
        config.set_symbolizer_path(Some("/opt/llvm/bin/llvm-addr2line".to_string()));
        let symbolizer = ExternalSymbolizer::for_config(&config);
        assert_eq!(symbolizer.executable(), "/opt/llvm/bin/llvm-addr2line");
        assert_eq!(symbolizer.family(), SymbolizerFamily::for_this_platform());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_missing_helper() {
        let symbolizer = ExternalSymbolizer::new(SymbolizerFamily::Addr2line, "/tmp/prog")
            .with_executable("/nonexistent/definitely-not-a-symbolizer");
        assert!(matches!(
            symbolizer.try_run(&[0x10]),
            Err(SymbolizerError::Spawn { .. })
        ));
        let output = symbolizer.run(&[0x10]);
        assert_ne!(output.status, 0);
        assert!(output.text.is_empty());
    }

    #[test]
    #[cfg(unix)]
    #[cfg_attr(miri, ignore)]
    fn test_stdout_and_stderr_are_merged() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-addr2line");
        let mut file = std::fs::File::create(&script).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "echo \"first at one.rs:1\"").unwrap();
        writeln!(file, "echo \"second at two.rs:2\" 1>&2").unwrap();
        writeln!(file, "echo \"$@\"").unwrap();
        writeln!(file, "exit 3").unwrap();
        drop(file);
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let symbolizer = ExternalSymbolizer::new(SymbolizerFamily::Addr2line, "/tmp/prog")
            .with_executable(script.to_string_lossy());
        let output = symbolizer.run(&[0xff]);
        assert_eq!(output.status, 3);
        assert_eq!(
            output.text,
            "first at one.rs:1\nsecond at two.rs:2\n-f -i -C -s -p -e /tmp/prog ff\n"
        );
    }
}
