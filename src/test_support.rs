//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::process::{CommandError, CommandOutput, CommandRunner};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Clones share the same queue and invocation log, so a test can keep one
/// handle while the code under test owns another.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables passed alongside the command.
    pub env: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        crate::process::render_command(&self.program, &self.args)
    }

    /// Looks up an environment variable passed with the invocation.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Returns the rendered command lines recorded so far.
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        lock(&self.invocations)
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Number of responses not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.responses).len()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with the given stdout.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run_with_env(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(String, String)],
    ) -> Result<CommandOutput, CommandError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            env: env.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}
