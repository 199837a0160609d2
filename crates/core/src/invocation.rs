//! External tool invocation.
//!
//! Every external call is described by an [`Invocation`]: an executable, an argument vector and
//! an optional working directory. Arguments are passed to the operating system as-is; no shell
//! is involved, so paths containing spaces or metacharacters are never reinterpreted.
//! [`Invocation::command_line`] renders a quoted form for logs only.
//!
//! Execution goes through the [`Executor`] trait so that the orchestration code can be driven
//! by [`ProcessExecutor`] in production and by recording executors in tests.

use crate::{QcError, QcResult};
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Description of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn current_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Checks the descriptor before anything is spawned.
    ///
    /// # Errors
    ///
    /// Returns `QcError::InvalidInvocation` if the program is empty, or the working directory is
    /// set but is not an existing directory.
    pub fn validate(&self) -> QcResult<()> {
        if self.program.as_os_str().is_empty() {
            return Err(QcError::InvalidInvocation("program cannot be empty".into()));
        }
        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                return Err(QcError::InvalidInvocation(format!(
                    "working directory {} does not exist",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Renders the command with POSIX shell quoting, for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|part| shell_quote(&part.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let plain = s
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,+@%".contains(&b));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r#"'"'"'"#))
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationOutput {
    /// Exit code, `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl InvocationOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Runs invocations to completion.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `invocation` and waits for it to finish.
    ///
    /// A non-zero exit is not an error at this level; it is reported through
    /// [`InvocationOutput::exit_code`]. Errors are reserved for invalid descriptors and
    /// processes that could not be started.
    async fn execute(&self, invocation: &Invocation) -> QcResult<InvocationOutput>;
}

/// Executes invocations as child processes with `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, invocation: &Invocation) -> QcResult<InvocationOutput> {
        invocation.validate()?;

        let mut command = tokio::process::Command::new(invocation.program());
        command
            .args(invocation.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(dir) = invocation.current_dir() {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|source| QcError::Spawn {
            program: invocation.program().to_path_buf(),
            source,
        })?;

        Ok(InvocationOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
