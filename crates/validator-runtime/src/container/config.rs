//! # Runtime Configuration
//!
//! Bus, validator and startup-probe settings. Every value has a default and
//! can be overridden from the environment.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Identity stamped on outgoing events.
    pub app: AppConfig,
    /// Message bus configuration.
    pub bus: BusConfig,
    /// External validator configuration.
    pub validator: ValidatorConfig,
    /// Startup dependency probe.
    pub probe: ProbeConfig,
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Topic `{0}` must not be empty")]
    EmptyTopic(&'static str),

    #[error("Consumer and producer topic are both `{0}`")]
    SameTopic(String),

    #[error("Receive timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Command `{0}` must not be empty")]
    EmptyCommand(&'static str),
}

impl RuntimeConfig {
    /// Load defaults, then apply `SIPV_*` environment overrides.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("SIPV_APP_NAME") {
            config.app.name = name;
        }
        if let Some(event_type) = lookup("SIPV_EVENT_TYPE") {
            config.app.event_type = event_type;
        }

        if let Some(host) = lookup("SIPV_BUS_HOST") {
            config.bus.host = host;
        }
        if let Some(port) = lookup("SIPV_BUS_PORT") {
            match port.parse() {
                Ok(p) => config.bus.port = p,
                Err(_) => warn!(value = %port, "Ignoring invalid SIPV_BUS_PORT"),
            }
        }
        if let Some(topic) = lookup("SIPV_CONSUMER_TOPIC") {
            config.bus.consumer_topic = topic;
        }
        if let Some(topic) = lookup("SIPV_PRODUCER_TOPIC") {
            config.bus.producer_topic = topic;
        }
        if let Some(subscription) = lookup("SIPV_SUBSCRIPTION") {
            config.bus.subscription = subscription;
        }
        if let Some(ms) = lookup("SIPV_RECEIVE_TIMEOUT_MS") {
            match ms.parse() {
                Ok(v) => config.bus.receive_timeout_ms = v,
                Err(_) => warn!(value = %ms, "Ignoring invalid SIPV_RECEIVE_TIMEOUT_MS"),
            }
        }
        if let Some(ms) = lookup("SIPV_REDELIVERY_DELAY_MS") {
            match ms.parse() {
                Ok(v) => config.bus.redelivery_delay_ms = v,
                Err(_) => warn!(value = %ms, "Ignoring invalid SIPV_REDELIVERY_DELAY_MS"),
            }
        }
        if let Some(max) = lookup("SIPV_MAX_REDELIVERIES") {
            match max.parse() {
                Ok(v) => config.bus.max_redeliveries = v,
                Err(_) => warn!(value = %max, "Ignoring invalid SIPV_MAX_REDELIVERIES"),
            }
        }

        if let Some(cmd) = lookup("SIPV_VALIDATOR_CMD") {
            config.validator.command = split_command(&cmd);
        }
        if let Some(cmd) = lookup("SIPV_PROBE_CMD") {
            config.probe.command = split_command(&cmd);
        }

        config
    }

    /// Reject settings the listener cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.consumer_topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic("consumer"));
        }
        if self.bus.producer_topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic("producer"));
        }
        if self.bus.consumer_topic == self.bus.producer_topic {
            return Err(ConfigError::SameTopic(self.bus.consumer_topic.clone()));
        }
        if self.bus.receive_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.validator.command.is_empty() {
            return Err(ConfigError::EmptyCommand("validator"));
        }
        if self.probe.command.is_empty() {
            return Err(ConfigError::EmptyCommand("probe"));
        }
        Ok(())
    }
}

/// Split a whitespace-separated command line into program and arguments.
fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Identity of this application on the bus.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Value of the `source` attribute on outgoing events.
    pub name: String,
    /// Value of the `type` attribute on outgoing events.
    pub event_type: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "sip-validator".to_string(),
            event_type: "be.sipin.validated".to_string(),
        }
    }
}

/// Message bus configuration.
///
/// `host`, `port` and `subscription` address a broker-backed client. The
/// in-memory bus ignores them.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    /// Topic carrying incoming (unzipped) events.
    pub consumer_topic: String,
    /// Topic receiving validation outcomes.
    pub producer_topic: String,
    pub subscription: String,
    /// Upper bound on a single receive wait.
    pub receive_timeout_ms: u64,
    /// Wait before a negatively acknowledged message is redelivered.
    pub redelivery_delay_ms: u64,
    /// Redeliveries before a message moves to the dead-letter topic.
    pub max_redeliveries: u32,
}

impl BusConfig {
    #[must_use]
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    #[must_use]
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }

    /// Broker URL for a broker-backed client.
    #[must_use]
    pub fn url(&self) -> String {
        format!("pulsar://{}:{}", self.host, self.port)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6650,
            consumer_topic: "sipin-unzip".to_string(),
            producer_topic: "sipin-validate".to_string(),
            subscription: "sip-validator".to_string(),
            receive_timeout_ms: 500,
            redelivery_delay_ms: 1000,
            max_redeliveries: 5,
        }
    }
}

/// External validator invocation.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Program and leading arguments; the SIP root is appended.
    pub command: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            command: vec!["sip-validator-cli".to_string()],
        }
    }
}

/// Runtime dependency probe run once at startup.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub command: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: vec!["java".to_string(), "-version".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.app.name, "sip-validator");
        assert_eq!(config.bus.port, 6650);
        assert_eq!(config.bus.receive_timeout(), Duration::from_millis(500));
        assert_eq!(config.bus.redelivery_delay(), Duration::from_secs(1));
        assert_eq!(config.bus.max_redeliveries, 5);
        assert_eq!(config.probe.command, vec!["java", "-version"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = RuntimeConfig::from_lookup(lookup_from(&[
            ("SIPV_BUS_HOST", "pulsar.internal"),
            ("SIPV_BUS_PORT", "6651"),
            ("SIPV_CONSUMER_TOPIC", "persistent://public/sipin/unzip"),
            ("SIPV_RECEIVE_TIMEOUT_MS", "200"),
            ("SIPV_REDELIVERY_DELAY_MS", "30000"),
            ("SIPV_MAX_REDELIVERIES", "2"),
            ("SIPV_VALIDATOR_CMD", "python -m sip_validator"),
        ]));

        assert_eq!(config.bus.url(), "pulsar://pulsar.internal:6651");
        assert_eq!(config.bus.consumer_topic, "persistent://public/sipin/unzip");
        assert_eq!(config.bus.receive_timeout_ms, 200);
        assert_eq!(config.bus.redelivery_delay(), Duration::from_secs(30));
        assert_eq!(config.bus.max_redeliveries, 2);
        assert_eq!(
            config.validator.command,
            vec!["python", "-m", "sip_validator"]
        );
    }

    #[test]
    fn test_invalid_numbers_are_ignored() {
        let config = RuntimeConfig::from_lookup(lookup_from(&[
            ("SIPV_BUS_PORT", "not-a-port"),
            ("SIPV_RECEIVE_TIMEOUT_MS", "-5"),
            ("SIPV_MAX_REDELIVERIES", "many"),
        ]));
        assert_eq!(config.bus.port, 6650);
        assert_eq!(config.bus.receive_timeout_ms, 500);
        assert_eq!(config.bus.max_redeliveries, 5);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = RuntimeConfig::default();
        config.bus.producer_topic = config.bus.consumer_topic.clone();
        assert!(matches!(config.validate(), Err(ConfigError::SameTopic(_))));

        let mut config = RuntimeConfig::default();
        config.bus.consumer_topic = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyTopic("consumer")));

        let mut config = RuntimeConfig::default();
        config.bus.receive_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));

        let config = RuntimeConfig::from_lookup(lookup_from(&[("SIPV_PROBE_CMD", "   ")]));
        assert_eq!(config.validate(), Err(ConfigError::EmptyCommand("probe")));
    }
}
