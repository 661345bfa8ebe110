//! External command execution.
//!
//! The vCloud pipeline shells out to `ping` and `tar`, and the vSphere, AWS
//! and OpenStack clients drive their vendor CLIs. All of them go through
//! [`CommandRunner`] so tests can substitute scripted responses.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Captured output of a finished command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Converts a non-zero exit into [`CommandError::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failed`] when the command did not succeed.
    pub fn into_success(self, program: &str) -> Result<Self, CommandError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(CommandError::Failed {
            program: program.to_owned(),
            status: self
                .code
                .map_or_else(|| String::from("unknown"), |code| code.to_string()),
            stderr: self.stderr.trim().to_owned(),
        })
    }
}

/// Errors raised while running external commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// The command could not be started.
    #[error("failed to start {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying operating system error.
        message: String,
    },
    /// The command ran but exited unsuccessfully.
    #[error("{program} exited with status {status}: {stderr}")]
    Failed {
        /// Program that failed.
        program: String,
        /// Exit status, or `unknown` when terminated by a signal.
        status: String,
        /// Trimmed standard error.
        stderr: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.run_with_env(program, args, &[])
    }

    /// Runs `program` with extra environment variables layered over the
    /// inherited environment. Credentials are passed this way so they never
    /// appear on a process command line.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run_with_env(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(String, String)],
    ) -> Result<CommandOutput, CommandError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run_with_env(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(String, String)],
    ) -> Result<CommandOutput, CommandError> {
        debug!(command = %render_command(program, args), "running command");
        let output = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .output()
            .map_err(|err| CommandError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Renders a program and its arguments as a single line for logs.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = program.to_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

/// Collects string-like arguments into the owned form runners expect.
#[must_use]
pub fn os_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    args.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some(0), true)]
    #[case(Some(2), false)]
    #[case(None, false)]
    fn success_requires_zero_exit(#[case] code: Option<i32>, #[case] expected: bool) {
        let output = CommandOutput {
            code,
            ..CommandOutput::default()
        };
        assert_eq!(output.is_success(), expected);
    }

    #[test]
    fn into_success_reports_status_and_stderr() {
        let output = CommandOutput {
            code: None,
            stdout: String::new(),
            stderr: String::from("  killed\n"),
        };

        let err = output.into_success("govc").expect_err("signal exit should fail");
        assert_eq!(err.to_string(), "govc exited with status unknown: killed");
    }

    #[test]
    fn render_command_joins_arguments() {
        let rendered = render_command("ping", &os_args(["-c", "5", "10.0.0.5"]));
        assert_eq!(rendered, "ping -c 5 10.0.0.5");
    }
}
