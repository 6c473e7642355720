use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::PublisherConfig;
use crate::error::{Error, Result};

/// Applies a committed payload to the repository. Called once per commit attempt.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, repository: &str, path: &str, payload_ref: &str) -> Result<()>;
}

pub fn publisher_from_config(config: &PublisherConfig) -> Arc<dyn Publisher> {
    match &config.command {
        Some(program) => Arc::new(CommandPublisher::new(
            program.clone(),
            config.args.clone(),
            config.timeout(),
        )),
        None => {
            tracing::warn!("No publisher command configured, commits will only be logged");
            Arc::new(NoopPublisher)
        }
    }
}

/// Accepts every payload without doing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, repository: &str, path: &str, payload_ref: &str) -> Result<()> {
        tracing::info!(repository, path, payload_ref, "Accepted payload (no publisher configured)");
        Ok(())
    }
}

/// Runs an external program for each commit.
///
/// The program receives the configured arguments and the lease details in
/// `LEASEGATE_REPOSITORY`, `LEASEGATE_PATH` and `LEASEGATE_PAYLOAD`. A non-zero
/// exit status fails the publish.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPublisher {
    #[must_use]
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }
}

#[async_trait]
impl Publisher for CommandPublisher {
    async fn publish(&self, repository: &str, path: &str, payload_ref: &str) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("LEASEGATE_REPOSITORY", repository)
            .env("LEASEGATE_PATH", path)
            .env("LEASEGATE_PAYLOAD", payload_ref)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            Error::PublishFailed(format!("cannot start {}: {e}", self.program.display()))
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::PublishFailed(format!(
                    "publisher timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::PublishFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::PublishFailed(format!(
                "publisher exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::debug!(repository, path, payload_ref, "Publisher finished");
        Ok(())
    }
}
