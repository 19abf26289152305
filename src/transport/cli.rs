// CLI transport - runs a local vendor tool and captures its standard output

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{CollectorError, Result};

/// Runs an external program to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Returns stdout of a successful run.
    ///
    /// `args` may carry credentials; implementations must not log them.
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// `tokio::process` runner with a wall-clock limit per invocation
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        ProcessRunner { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!("Running {} ({} argument(s))", program, args.len());

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CollectorError::Transport(format!(
                    "failed to start {}: {}",
                    program, e
                )))
            }
            Err(_) => {
                return Err(CollectorError::Transport(format!(
                    "{} timed out after {:?}",
                    program, self.timeout
                )))
            }
        };

        if !output.status.success() {
            return Err(CollectorError::Process {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
