//! # Event Listener
//!
//! The relay's processing loop.
//!
//! ## Lifecycle
//!
//! ```text
//!            start() + probe ok                 stop signal / bus closed
//! STOPPED ─────────────────────→ RUNNING ─────────────────────────────────→ STOPPED
//!                                   │                                   (bus closed)
//!                                   └─ receive → handle → settle (one message at a time)
//! ```
//!
//! ## Per-message protocol
//!
//! 1. Decode the raw message.
//! 2. Drop events whose own outcome is not `success` (acknowledged, nothing
//!    published).
//! 3. Resolve the SIP root, validate when resolved, build and publish the
//!    outcome event.
//! 4. Settle: acknowledge on `Published`/`Dropped`, negative-acknowledge on
//!    `Failed`. Exactly one settlement per received message.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use shared_bus::{
    decode, encode, BusClient, BusError, DecodeError, Event, EventOutcome, MessageId, RawMessage,
    Received, ShutdownSignal,
};

use crate::adapters::{resolve_root, InvocationError, RuntimeProbe, SipValidator, StartupError};
use crate::container::{AppConfig, RuntimeConfig};
use crate::handlers::outcome::{assess, build_outcome};

/// Longest pause after a transient receive failure.
const MAX_RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Listener lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Running,
}

/// Per-message failures. Each one leads to a negative-acknowledge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Event data has no string `destination`")]
    MissingDestination,

    #[error("Validation failed to run: {0}")]
    Invocation(#[from] InvocationError),

    #[error("Publishing outcome failed: {0}")]
    Publish(BusError),
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// An outcome event was published.
    Published {
        message_id: MessageId,
        outcome: EventOutcome,
    },
    /// The incoming event reported an upstream failure and was skipped.
    Dropped,
    /// Processing failed; the message should be redelivered.
    Failed(ProcessingError),
}

/// Terminal action for a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acknowledge,
    NegativeAcknowledge,
}

impl Disposition {
    #[must_use]
    pub fn settlement(&self) -> Settlement {
        match self {
            Disposition::Published { .. } | Disposition::Dropped => Settlement::Acknowledge,
            Disposition::Failed(_) => Settlement::NegativeAcknowledge,
        }
    }
}

/// Snapshot of listener counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub received: u64,
    pub published: u64,
    pub dropped: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Consumes incoming events, validates and publishes outcomes.
///
/// Owns the bus connection from construction until the loop stops.
pub struct EventListener<B, V> {
    app: AppConfig,
    producer_topic: String,
    receive_timeout: Duration,
    bus: B,
    validator: V,
    state: ListenerState,
    counters: Counters,
}

impl<B, V> EventListener<B, V>
where
    B: BusClient,
    V: SipValidator,
{
    pub fn new(config: &RuntimeConfig, bus: B, validator: V) -> Self {
        Self {
            app: config.app.clone(),
            producer_topic: config.bus.producer_topic.clone(),
            receive_timeout: config.bus.receive_timeout(),
            bus,
            validator,
            state: ListenerState::Stopped,
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            received: self.counters.received.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Verify the runtime dependency and enter `Running`.
    ///
    /// On failure the bus connection is released and the listener stays
    /// `Stopped`.
    pub async fn start<P>(&mut self, probe: &P) -> Result<(), StartupError>
    where
        P: RuntimeProbe + ?Sized,
    {
        if let Err(e) = probe.check().await {
            error!(error = %e, "Startup precondition failed");
            self.release_bus().await;
            return Err(e);
        }
        self.state = ListenerState::Running;
        info!(
            producer_topic = %self.producer_topic,
            receive_timeout_ms = self.receive_timeout.as_millis() as u64,
            "Listener running"
        );
        Ok(())
    }

    /// Process messages until `shutdown` fires or the bus closes.
    ///
    /// The stop signal is observed between messages and while waiting in
    /// `receive`; an in-flight message is always finished first. The bus is
    /// closed on every exit path.
    pub async fn run(&mut self, mut shutdown: ShutdownSignal) -> ListenerStats {
        if self.state != ListenerState::Running {
            warn!("Listener is not running, call start() first");
            return self.stats();
        }

        loop {
            if shutdown.is_triggered() {
                info!("Stop requested");
                break;
            }

            let message = match self.bus.receive(self.receive_timeout, &mut shutdown).await {
                Ok(Received::Message(message)) => message,
                Ok(Received::Timeout) => continue,
                Ok(Received::Cancelled) => {
                    info!("Stop requested while waiting for messages");
                    break;
                }
                Err(BusError::Closed) => {
                    warn!("Bus closed underneath the listener");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Receive failed");
                    let backoff = self.receive_timeout.min(MAX_RECEIVE_BACKOFF);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.triggered() => {}
                    }
                    continue;
                }
            };

            let span = info_span!(
                "message",
                message_id = %message.id,
                redelivery_count = message.redelivery_count
            );
            async {
                let disposition = self.handle(&message).await;
                self.settle(&message, &disposition).await;
            }
            .instrument(span)
            .await;
        }

        self.release_bus().await;
        let stats = self.stats();
        info!(
            received = stats.received,
            published = stats.published,
            dropped = stats.dropped,
            failed = stats.failed,
            "Listener stopped"
        );
        stats
    }

    /// Handle one message without settling it.
    pub async fn handle(&self, message: &RawMessage) -> Disposition {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        match self.process(message).await {
            Ok(Some((message_id, outcome))) => Disposition::Published {
                message_id,
                outcome,
            },
            Ok(None) => Disposition::Dropped,
            Err(e) => Disposition::Failed(e),
        }
    }

    async fn process(
        &self,
        message: &RawMessage,
    ) -> Result<Option<(MessageId, EventOutcome)>, ProcessingError> {
        let event = decode(message)?;

        if !event.has_successful_outcome() {
            info!(
                correlation_id = %event.correlation_id(),
                data = %serde_json::Value::Object(event.data().clone()),
                "Dropping non successful event"
            );
            return Ok(None);
        }

        let destination = destination_of(&event)?;
        info!(
            correlation_id = %event.correlation_id(),
            subject = %event.subject(),
            destination = %destination,
            "Start handling"
        );

        let root = resolve_root(Path::new(destination));
        if root.is_none() {
            warn!(destination = %destination, "No single root folder found");
        }
        let step = assess(root, &self.validator).await?;
        let outgoing = build_outcome(&self.app, &event, &step);
        let outcome = outgoing.outcome();

        let message_id = self
            .bus
            .produce(&self.producer_topic, encode(&outgoing))
            .await
            .map_err(ProcessingError::Publish)?;

        debug!(
            outgoing_id = %message_id,
            outcome = %outcome,
            topic = %self.producer_topic,
            "Outcome published"
        );
        Ok(Some((message_id, outcome)))
    }

    async fn settle(&self, message: &RawMessage, disposition: &Disposition) {
        match disposition {
            Disposition::Published { .. } => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
            }
            Disposition::Dropped => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Disposition::Failed(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Processing failed, message will be redelivered");
            }
        }

        let result = match disposition.settlement() {
            Settlement::Acknowledge => self.bus.acknowledge(message).await,
            Settlement::NegativeAcknowledge => self.bus.negative_acknowledge(message).await,
        };
        if let Err(e) = result {
            error!(error = %e, settlement = ?disposition.settlement(), "Settling message failed");
        }
    }

    async fn release_bus(&mut self) {
        self.state = ListenerState::Stopped;
        match self.bus.close().await {
            Ok(()) => debug!("Bus connection released"),
            Err(BusError::Closed) => debug!("Bus connection already closed"),
            Err(e) => warn!(error = %e, "Closing bus connection failed"),
        }
    }
}

fn destination_of(event: &Event) -> Result<&str, ProcessingError> {
    event
        .data()
        .get("destination")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProcessingError::MissingDestination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ValidationVerdict;
    use async_trait::async_trait;
    use serde_json::json;
    use shared_bus::{shutdown_channel, InMemoryBus, OutboundMessage};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct Verdict(bool);

    #[async_trait]
    impl SipValidator for Verdict {
        async fn validate(&self, _root: &Path) -> Result<ValidationVerdict, InvocationError> {
            Ok(ValidationVerdict {
                is_valid: self.0,
                report: json!({}),
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl SipValidator for Broken {
        async fn validate(&self, _root: &Path) -> Result<ValidationVerdict, InvocationError> {
            Err(InvocationError::Fault("validator crashed".to_string()))
        }
    }

    struct Probe(bool);

    #[async_trait]
    impl RuntimeProbe for Probe {
        async fn check(&self) -> Result<(), StartupError> {
            if self.0 {
                Ok(())
            } else {
                Err(StartupError::DependencyMissing("java".to_string()))
            }
        }
    }

    fn incoming(outcome: &str, destination: &str) -> OutboundMessage {
        let mut properties = BTreeMap::new();
        properties.insert("subject".to_string(), "s".to_string());
        properties.insert("correlation_id".to_string(), "c".to_string());
        properties.insert("outcome".to_string(), outcome.to_string());
        OutboundMessage {
            properties,
            payload: json!({"data": {"destination": destination}})
                .to_string()
                .into_bytes(),
        }
    }

    async fn delivered(bus: &InMemoryBus, message: OutboundMessage) -> RawMessage {
        bus.produce("sipin-unzip", message).await.unwrap();
        let (_trigger, mut signal) = shutdown_channel();
        match bus
            .receive(Duration::from_millis(100), &mut signal)
            .await
            .unwrap()
        {
            Received::Message(m) => m,
            other => panic!("expected message, got {:?}", other),
        }
    }

    fn listener<V: SipValidator>(bus: Arc<InMemoryBus>, validator: V) -> EventListener<Arc<InMemoryBus>, V> {
        EventListener::new(&RuntimeConfig::default(), bus, validator)
    }

    #[test]
    fn test_settlement_follows_disposition() {
        assert_eq!(Disposition::Dropped.settlement(), Settlement::Acknowledge);
        assert_eq!(
            Disposition::Published {
                message_id: MessageId(1),
                outcome: EventOutcome::Fail
            }
            .settlement(),
            Settlement::Acknowledge
        );
        assert_eq!(
            Disposition::Failed(ProcessingError::MissingDestination).settlement(),
            Settlement::NegativeAcknowledge
        );
    }

    #[tokio::test]
    async fn test_handle_drops_failed_upstream_event() {
        let bus = Arc::new(InMemoryBus::new("sipin-unzip"));
        let listener = listener(Arc::clone(&bus), Verdict(true));
        let message = delivered(&bus, incoming("fail", "/nowhere")).await;

        assert_eq!(listener.handle(&message).await, Disposition::Dropped);
        assert_eq!(bus.pending("sipin-validate"), 0);
    }

    #[tokio::test]
    async fn test_handle_publishes_fail_outcome_for_empty_destination() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(InMemoryBus::new("sipin-unzip"));
        let listener = listener(Arc::clone(&bus), Verdict(true));
        let message = delivered(&bus, incoming("success", dir.path().to_str().unwrap())).await;

        let disposition = listener.handle(&message).await;
        assert!(matches!(
            disposition,
            Disposition::Published { outcome: EventOutcome::Fail, .. }
        ));
        assert_eq!(bus.pending("sipin-validate"), 1);
    }

    #[tokio::test]
    async fn test_handle_fails_on_missing_destination() {
        let bus = Arc::new(InMemoryBus::new("sipin-unzip"));
        let listener = listener(Arc::clone(&bus), Verdict(true));
        let mut message = incoming("success", "x");
        message.payload = br#"{"data": {"path": "/x"}}"#.to_vec();
        let message = delivered(&bus, message).await;

        assert_eq!(
            listener.handle(&message).await,
            Disposition::Failed(ProcessingError::MissingDestination)
        );
    }

    #[tokio::test]
    async fn test_handle_fails_on_validator_fault() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("case1")).unwrap();
        let bus = Arc::new(InMemoryBus::new("sipin-unzip"));
        let listener = listener(Arc::clone(&bus), Broken);
        let message = delivered(&bus, incoming("success", dir.path().to_str().unwrap())).await;

        assert!(matches!(
            listener.handle(&message).await,
            Disposition::Failed(ProcessingError::Invocation(_))
        ));
        assert_eq!(bus.pending("sipin-validate"), 0);
    }

    #[tokio::test]
    async fn test_start_fails_without_runtime() {
        let bus = Arc::new(InMemoryBus::new("sipin-unzip"));
        let mut listener = listener(Arc::clone(&bus), Verdict(true));

        let err = listener.start(&Probe(false)).await.unwrap_err();
        assert!(matches!(err, StartupError::DependencyMissing(_)));
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn test_run_requires_start() {
        let bus = Arc::new(InMemoryBus::new("sipin-unzip"));
        let mut listener = listener(Arc::clone(&bus), Verdict(true));
        let (_trigger, signal) = shutdown_channel();

        let stats = listener.run(signal).await;
        assert_eq!(stats, ListenerStats::default());
        assert!(!bus.is_closed());
    }

    #[tokio::test]
    async fn test_run_stops_on_signal_and_closes_bus() {
        let bus = Arc::new(InMemoryBus::new("sipin-unzip"));
        let mut listener = listener(Arc::clone(&bus), Verdict(true));
        let (trigger, signal) = shutdown_channel();

        listener.start(&Probe(true)).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Running);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });
        tokio::time::timeout(Duration::from_secs(5), listener.run(signal))
            .await
            .expect("listener should stop");

        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn test_run_exits_when_bus_closed() {
        let bus = Arc::new(InMemoryBus::new("sipin-unzip"));
        let mut listener = listener(Arc::clone(&bus), Verdict(true));
        let (_trigger, signal) = shutdown_channel();

        listener.start(&Probe(true)).await.unwrap();
        bus.close().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), listener.run(signal))
            .await
            .expect("listener should stop");
        assert_eq!(listener.state(), ListenerState::Stopped);
    }
}
