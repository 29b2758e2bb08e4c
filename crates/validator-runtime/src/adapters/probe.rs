//! # Runtime Dependency Probe
//!
//! The validator relies on a third-party runtime being installed. The probe
//! runs once before the listener enters the running state.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info};

/// Fatal errors raised before the listener starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StartupError {
    #[error("Required runtime dependency missing: {0}")]
    DependencyMissing(String),
}

/// Startup precondition check.
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    async fn check(&self) -> Result<(), StartupError>;
}

/// Probe that runs a command and requires a zero exit status.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    command: Vec<String>,
}

impl CommandProbe {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn display(&self) -> String {
        self.command.join(" ")
    }
}

#[async_trait]
impl RuntimeProbe for CommandProbe {
    async fn check(&self) -> Result<(), StartupError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(StartupError::DependencyMissing(
                "no probe command configured".to_string(),
            ));
        };

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                error!(command = %self.display(), error = %e, "Runtime probe could not start");
                StartupError::DependencyMissing(format!("`{}`: {}", self.display(), e))
            })?;

        if !output.status.success() {
            error!(command = %self.display(), status = %output.status, "Runtime probe failed");
            return Err(StartupError::DependencyMissing(format!(
                "`{}` exited with {}",
                self.display(),
                output.status
            )));
        }

        // Java prints its version banner on stderr.
        let banner = if output.stderr.is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        let first_line = String::from_utf8_lossy(&banner)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        info!(command = %self.display(), version = %first_line, "Runtime dependency present");
        Ok(())
    }
}
