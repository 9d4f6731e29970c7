// crates/core/src/command.rs
//! Subprocess job payload.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::ExecutionFault;
use crate::job::{Job, JobContext};
use crate::types::{JobResult, TerminationCapability};

/// Runs an external program and captures its output as the job result.
///
/// Declares `Forceful` termination: the child is killed when the job is
/// cancelled, and the manager may abort the waiting body after the grace
/// period.
pub struct CommandJob {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl CommandJob {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

async fn drain(reader: Option<impl tokio::io::AsyncRead + Unpin + Send>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait]
impl Job for CommandJob {
    fn kind(&self) -> &str {
        "command"
    }

    fn termination(&self) -> TerminationCapability {
        TerminationCapability::Forceful
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult, ExecutionFault> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ExecutionFault::new(format!("Failed to spawn {}: {e}", self.program))
        })?;
        ctx.report(0, 0, Some(&format!("running {}", self.program)))
            .await;

        // Readers run alongside the wait so a chatty child never fills
        // its pipe buffers and stalls.
        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| {
                ExecutionFault::new(format!("Failed to wait for {}: {e}", self.program))
            })?,
            _ = ctx.cancelled() => {
                tracing::info!(token = ctx.token().as_str(), program = %self.program, "Killing child on cancellation");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(program = %self.program, "Failed to kill child: {e}");
                }
                let _ = child.wait().await;
                return Err(ExecutionFault::new("Job was cancelled"));
            }
        };

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();
        let exit_code = status.code();

        let mut metadata = HashMap::new();
        metadata.insert("command".to_string(), json!(self.program));
        metadata.insert("exit_code".to_string(), json!(exit_code));

        let data = json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        });

        Ok(JobResult {
            success: status.success(),
            data,
            error: if status.success() {
                None
            } else {
                Some(format!("Command exited with {status}"))
            },
            metadata,
        })
    }
}
