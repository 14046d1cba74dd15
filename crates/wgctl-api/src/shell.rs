//! Abstraction over external command execution.
//!
//! Interface hooks, resolvconf and ping go through [`ShellRunner`], so tests can swap in a recording mock and the
//! production path gets a single place for timeouts and logging.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::Error;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout of a successful run, or [`Error::Command`].
    pub fn into_stdout(self, program: &str) -> Result<String, Error> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(Error::Command {
                program: program.to_owned(),
                status: self.status,
                stderr: self.stderr.trim().to_owned(),
            })
        }
    }
}

/// Runs a program with arguments and optional stdin.
///
/// A non-zero exit is not an error at this level; callers decide through
/// [`CommandOutput::into_stdout`] or by inspecting the status.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, Error>;
}

/// Production [`ShellRunner`] backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemShell {
    timeout: Duration,
}

impl SystemShell {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemShell {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ShellRunner for SystemShell {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, Error> {
        debug!(program, ?args, "exec");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })??;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Convenience: owned argument vector from string slices.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn failed_output_becomes_command_error() {
        let out = CommandOutput {
            status: Some(2),
            stdout: String::new(),
            stderr: "Cannot find device \"wg9\"\n".into(),
        };
        match out.into_stdout("ip").unwrap_err() {
            Error::Command { program, status, stderr } => {
                assert_eq!(program, "ip");
                assert_eq!(status, Some(2));
                assert_eq!(stderr, "Cannot find device \"wg9\"");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn system_shell_captures_stdout_and_stdin() {
        let shell = SystemShell::default();
        let out = shell.run("cat", &[], Some("hello")).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
    }
}
