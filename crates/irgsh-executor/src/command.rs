//! Running external commands.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use irgsh_core::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// Exit status and diagnostics of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub stderr: String,
}

/// A command line, optionally run through `sudo`.
pub struct CommandLine {
    cmd: Command,
    display: String,
}

impl CommandLine {
    pub fn new(program: &str) -> Self {
        Self::with_privilege(program, false)
    }

    pub fn with_privilege(program: &str, privileged: bool) -> Self {
        let (mut cmd, display) = if privileged {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            (cmd, format!("sudo {}", program))
        } else {
            (Command::new(program), program.to_string())
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Self { cmd, display }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.display.push(' ');
        self.display.push_str(&arg.as_ref().to_string_lossy());
        self.cmd.arg(arg);
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cmd.current_dir(dir);
        self
    }

    pub fn env(mut self, key: &str, value: impl AsRef<OsStr>) -> Self {
        self.cmd.env(key, value);
        self
    }

    /// Run to completion; failing to start the program is an error.
    pub async fn output(mut self) -> Result<CommandOutput> {
        debug!(command = %self.display, "Executing command");
        let output = self
            .cmd
            .output()
            .await
            .map_err(|e| Error::Internal(format!("failed to run `{}`: {}", self.display, e)))?;
        Ok(CommandOutput {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run to completion; a non-zero exit is an error.
    pub async fn run(self) -> Result<()> {
        let display = self.display.clone();
        let output = self.output().await?;
        if output.success {
            Ok(())
        } else {
            Err(Error::Internal(format!("`{}` failed: {}", display, output.stderr)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_and_failure() {
        assert!(CommandLine::new("true").run().await.is_ok());

        let err = CommandLine::new("false").run().await.unwrap_err();
        assert!(matches!(err, Error::Internal(msg) if msg.contains("`false` failed")));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = CommandLine::new("irgsh-no-such-program").output().await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_stderr_captured() {
        let output = CommandLine::new("ls")
            .arg("/irgsh/definitely/missing")
            .output()
            .await
            .unwrap();
        assert!(!output.success);
        assert!(!output.stderr.is_empty());
    }
}
