//! Local process execution strategy.
//!
//! [`CommandStrategy`] runs an external program described by the job payload
//! and captures its standard output as the execution result. The payload
//! shape:
//!
//! ```json
//! {
//!   "program": "python",
//!   "args": ["-m", "etl.extract", "--source", "s3://bucket/raw"],
//!   "env": { "AWS_REGION": "us-east-1" },
//!   "working_dir": "/app"
//! }
//! ```
//!
//! Only `program` is required. The overall run is bounded by the job timeout,
//! which the executor enforces around `execute`; when the deadline elapses the
//! subprocess is terminated as the command future is dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{Strategy, StrategyError};
use crate::core::Job;

/// Payload contract for [`CommandStrategy`] jobs.
#[derive(Debug, Deserialize)]
struct CommandSpec {
    /// Program to execute.
    program: String,
    /// Command arguments.
    #[serde(default)]
    args: Vec<String>,
    /// Extra environment variables for the subprocess.
    #[serde(default)]
    env: HashMap<String, String>,
    /// Working directory.
    #[serde(default)]
    working_dir: Option<PathBuf>,
}

/// A strategy that executes an external command.
///
/// # Example
///
/// ```ignore
/// let job = Job::new("nightly-report", "Nightly report", CommandStrategy::KIND)
///     .with_payload(serde_json::json!({
///         "program": "sh",
///         "args": ["-c", "make report"],
///     }));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandStrategy;

impl CommandStrategy {
    /// Job kind tag handled by this strategy.
    pub const KIND: &'static str = "command";

    /// Create a new command strategy.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Strategy for CommandStrategy {
    fn kind(&self) -> &str {
        Self::KIND
    }

    async fn execute(&self, job: &Job) -> Result<String, StrategyError> {
        let spec: CommandSpec = serde_json::from_value(job.payload().clone())
            .map_err(|e| StrategyError::InvalidPayload(e.to_string()))?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = spec.working_dir {
            cmd.current_dir(dir);
        }

        // Capture stdout and stderr
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // The job timeout drops this future; take the subprocess down with it
        // so a retry never overlaps a still-running predecessor.
        cmd.kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| StrategyError::ExecutionFailed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(stdout)
        } else {
            // -1 stands in for termination by signal
            let code = output.status.code().unwrap_or(-1);
            Err(StrategyError::CommandFailed { code, stderr })
        }
    }
}
