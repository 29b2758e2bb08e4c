//! # Outcome Builder
//!
//! Turns an incoming event plus the resolution/validation result into the
//! outgoing event.
//!
//! The outgoing `outcome` says whether the validation logic *ran*, not
//! whether the SIP is valid:
//!
//! | Resolution | outcome | is_valid |
//! |------------|---------|----------|
//! | no single root folder | `fail` | `false` |
//! | root found, validator ran | `success` | validator verdict |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use shared_bus::{Event, EventAttributes, EventOutcome};

use crate::adapters::{invoke, InvocationError, SipValidator, ValidationVerdict};
use crate::container::AppConfig;

pub const NO_SINGLE_ROOT_MESSAGE: &str = "There should be one single root folder in the ZIP file.";
pub const VALIDATED_MESSAGE: &str = "The SIP has been validated";

/// What happened between resolution and validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationStep {
    /// Zero, several, or non-directory entries in the destination.
    NoSingleRoot,
    /// The root was found and the validator produced a verdict.
    Validated {
        root: PathBuf,
        verdict: ValidationVerdict,
    },
}

/// Run the validator only when a root was resolved.
pub async fn assess<V>(
    root: Option<PathBuf>,
    validator: &V,
) -> Result<ValidationStep, InvocationError>
where
    V: SipValidator + ?Sized,
{
    match root {
        None => Ok(ValidationStep::NoSingleRoot),
        Some(root) => {
            let verdict = invoke(validator, &root).await?;
            Ok(ValidationStep::Validated { root, verdict })
        }
    }
}

/// Payload of the outgoing event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub validation_report: Value,
    pub sip_path: String,
    pub message: String,
}

impl ValidationResult {
    fn no_single_root() -> Self {
        Self {
            is_valid: false,
            validation_report: Value::String(String::new()),
            sip_path: String::new(),
            message: NO_SINGLE_ROOT_MESSAGE.to_string(),
        }
    }

    fn validated(root: &Path, verdict: &ValidationVerdict) -> Self {
        Self {
            is_valid: verdict.is_valid,
            validation_report: verdict.report.clone(),
            sip_path: root.to_string_lossy().into_owned(),
            message: VALIDATED_MESSAGE.to_string(),
        }
    }

    /// Event `data` map.
    #[must_use]
    pub fn to_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("is_valid".to_string(), Value::Bool(self.is_valid));
        data.insert("validation_report".to_string(), self.validation_report.clone());
        data.insert("sip_path".to_string(), Value::String(self.sip_path.clone()));
        data.insert("message".to_string(), Value::String(self.message.clone()));
        data
    }
}

/// Build the outgoing event. Subject and correlation id are copied from
/// `incoming` unchanged.
#[must_use]
pub fn build_outcome(app: &AppConfig, incoming: &Event, step: &ValidationStep) -> Event {
    let (outcome, result) = match step {
        ValidationStep::NoSingleRoot => (EventOutcome::Fail, ValidationResult::no_single_root()),
        ValidationStep::Validated { root, verdict } => (
            EventOutcome::Success,
            ValidationResult::validated(root, verdict),
        ),
    };

    let attributes = EventAttributes::new(
        app.name.clone(),
        app.event_type.clone(),
        incoming.subject(),
        incoming.correlation_id(),
        outcome,
    );

    Event::new(attributes, result.to_data())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        verdict: bool,
    }

    #[async_trait]
    impl SipValidator for Counting {
        async fn validate(&self, _root: &Path) -> Result<ValidationVerdict, InvocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ValidationVerdict {
                is_valid: self.verdict,
                report: json!({"checks": 3}),
            })
        }
    }

    fn incoming() -> Event {
        let attrs = EventAttributes::new(
            "unzip-service",
            "be.sipin.unzipped",
            "subject with spaces ✓",
            "eac2ed9d37b4478d811daf7caa74f2db",
            EventOutcome::Success,
        );
        let mut data = Map::new();
        data.insert("destination".to_string(), json!("/unzipped/abc"));
        Event::new(attrs, data)
    }

    fn payload(event: &Event) -> ValidationResult {
        serde_json::from_value(Value::Object(event.data().clone())).unwrap()
    }

    #[test]
    fn test_no_root_builds_fail_event() {
        let app = AppConfig::default();
        let out = build_outcome(&app, &incoming(), &ValidationStep::NoSingleRoot);

        assert_eq!(out.outcome(), EventOutcome::Fail);
        assert_eq!(
            payload(&out),
            ValidationResult {
                is_valid: false,
                validation_report: json!(""),
                sip_path: String::new(),
                message: NO_SINGLE_ROOT_MESSAGE.to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_sip_is_still_success() {
        let app = AppConfig::default();
        let step = ValidationStep::Validated {
            root: PathBuf::from("/unzipped/abc/case1"),
            verdict: ValidationVerdict {
                is_valid: false,
                report: json!({"errors": 2}),
            },
        };
        let out = build_outcome(&app, &incoming(), &step);

        assert_eq!(out.outcome(), EventOutcome::Success);
        let result = payload(&out);
        assert!(!result.is_valid);
        assert_eq!(result.sip_path, "/unzipped/abc/case1");
        assert_eq!(result.validation_report, json!({"errors": 2}));
        assert_eq!(result.message, VALIDATED_MESSAGE);
    }

    #[test]
    fn test_correlation_context_is_propagated() {
        let app = AppConfig {
            name: "relay-under-test".to_string(),
            event_type: "t".to_string(),
        };
        let source = incoming();
        let out = build_outcome(&app, &source, &ValidationStep::NoSingleRoot);

        assert_eq!(out.subject(), source.subject());
        assert_eq!(out.correlation_id(), source.correlation_id());
        assert_eq!(out.attributes().source, "relay-under-test");
        assert_ne!(out.attributes().id, source.attributes().id);
    }

    #[tokio::test]
    async fn test_assess_skips_validator_without_root() {
        let validator = Counting {
            calls: AtomicUsize::new(0),
            verdict: true,
        };
        let step = assess(None, &validator).await.unwrap();
        assert_eq!(step, ValidationStep::NoSingleRoot);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_assess_validates_resolved_root() {
        let validator = Counting {
            calls: AtomicUsize::new(0),
            verdict: true,
        };
        let root = PathBuf::from("/unzipped/abc/case1");
        let step = assess(Some(root.clone()), &validator).await.unwrap();

        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            step,
            ValidationStep::Validated { root: ref r, ref verdict } if *r == root && verdict.is_valid
        ));
    }
}
