//! # Validation Invoker
//!
//! Calls the external SIP validator and normalizes its result into a
//! `(is_valid, report)` pair. Why a SIP is invalid is the validator's
//! business; this module only makes sure the call completes.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Normalized validator result.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    /// Structured report; always a JSON object or string.
    pub report: Value,
}

/// The validator could not produce a verdict.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("Failed to start validator `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Validator terminated without exit status")]
    Terminated,

    #[error("Validator exited with status {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("Validator fault: {0}")]
    Fault(String),
}

/// An opaque validation routine: SIP root in, verdict out.
#[async_trait]
pub trait SipValidator: Send + Sync {
    async fn validate(&self, root: &Path) -> Result<ValidationVerdict, InvocationError>;
}

/// Run `validator` against `root` and normalize the report.
pub async fn invoke<V>(validator: &V, root: &Path) -> Result<ValidationVerdict, InvocationError>
where
    V: SipValidator + ?Sized,
{
    let started = Instant::now();
    let verdict = validator.validate(root).await?;
    let report = normalize_report(verdict.report);

    info!(
        sip_path = %root.display(),
        is_valid = verdict.is_valid,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "SIP validated"
    );

    Ok(ValidationVerdict {
        is_valid: verdict.is_valid,
        report,
    })
}

fn normalize_report(report: Value) -> Value {
    match report {
        Value::Null => Value::Object(serde_json::Map::new()),
        Value::Object(_) | Value::String(_) => report,
        other => Value::String(other.to_string()),
    }
}

/// Validator backed by an external program.
///
/// The SIP root is appended as the last argument. Exit status 0 means valid,
/// 1 means invalid; stdout carries the report, as JSON when possible.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    program: String,
    args: Vec<String>,
}

impl CommandValidator {
    /// Build from a `[program, args..]` command line.
    pub fn new(command: &[String]) -> Result<Self, InvocationError> {
        let (program, args) = command.split_first().ok_or_else(|| {
            InvocationError::Fault("empty validator command".to_string())
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl SipValidator for CommandValidator {
    async fn validate(&self, root: &Path) -> Result<ValidationVerdict, InvocationError> {
        debug!(program = %self.program, sip_path = %root.display(), "Running validator");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| InvocationError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let is_valid = match output.status.code() {
            Some(0) => true,
            Some(1) => false,
            Some(code) => {
                return Err(InvocationError::Failed {
                    code,
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                })
            }
            None => return Err(InvocationError::Terminated),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = serde_json::from_str(stdout.trim())
            .unwrap_or_else(|_| Value::String(stdout.trim().to_string()));

        Ok(ValidationVerdict { is_valid, report })
    }
}
