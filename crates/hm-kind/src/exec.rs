//! ---
//! hm_section: "04-cluster-tooling"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Bounded subprocess execution for external cluster tools."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::fmt;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Result, ToolError};

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute, resolved through `PATH`.
    pub program: String,
    /// Arguments in order.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Bytes piped to the child's stdin.
    pub stdin: Option<Vec<u8>>,
    /// Upper bound for the whole invocation, including stdin delivery.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Command for `program` bounded by `timeout`.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Pipe `input` to the child's stdin.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Command line rendered for logs and error messages.
    pub fn command_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the child was terminated by a signal.
    pub code: Option<i32>,
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_owned();
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(stderr);
        }
        out
    }

    /// Convert a non-zero exit into [`ToolError::Failed`].
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                command: spec.command_line(),
                code: self.code,
                output: self.combined(),
            })
        }
    }
}

/// Executes [`CommandSpec`]s. Non-zero exits are returned as output, not errors.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion or until its timeout expires.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runner backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// New process runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let command = spec.command_line();
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            command: command.clone(),
            source,
        })?;
        let started = Instant::now();
        debug!(%command, pid = ?child.id(), "spawned external command");

        let input = spec.stdin.clone();
        let stdin = child.stdin.take();
        let completion = async move {
            if let (Some(input), Some(mut stdin)) = (input, stdin) {
                match stdin.write_all(&input).await {
                    // The child may exit without draining its stdin.
                    Err(err) if err.kind() == ErrorKind::BrokenPipe => {}
                    Err(err) => return Err(err),
                    Ok(()) => {}
                }
                drop(stdin);
            }
            child.wait_with_output().await
        };

        match tokio::time::timeout(spec.timeout, completion).await {
            Err(_) => {
                warn!(%command, timeout_secs = spec.timeout.as_secs_f64(), "external command timed out");
                Err(ToolError::Timeout {
                    command,
                    after: spec.timeout,
                })
            }
            Ok(Err(source)) => Err(ToolError::Io { command, source }),
            Ok(Ok(output)) => {
                let output = CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                debug!(
                    %command,
                    code = ?output.code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "external command finished"
                );
                Ok(output)
            }
        }
    }
}
