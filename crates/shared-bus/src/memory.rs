//! # In-Memory Bus
//!
//! Single-process implementation of [`BusClient`]. Topics are FIFO queues;
//! delivered messages stay in flight until settled. A negative-acknowledge
//! parks the message for the redelivery delay, after which it rejoins the
//! back of its topic. Messages behind a failing one keep flowing.
//!
//! Suitable for local runs and tests; distributed deployments plug a
//! broker-backed client in behind the same trait.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::{BusClient, BusError, Received};
use crate::events::{MessageId, OutboundMessage, RawMessage};
use crate::shutdown::ShutdownSignal;
use crate::DLQ_SUFFIX;

/// Route messages to a dead-letter topic after too many redeliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    /// Redeliveries allowed before a message is dead-lettered.
    pub max_redeliveries: u32,
}

/// Redelivery delay used by [`InMemoryBus::new`].
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_millis(100);

/// Snapshot of bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub produced: u64,
    pub acknowledged: u64,
    pub negatively_acknowledged: u64,
    pub dead_lettered: u64,
}

struct Delayed {
    due: Instant,
    message: RawMessage,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, VecDeque<RawMessage>>,
    in_flight: HashMap<MessageId, RawMessage>,
    /// Negatively acknowledged messages, in due order.
    delayed: VecDeque<Delayed>,
    next_id: u64,
    closed: bool,
}

impl BusState {
    /// Requeue every delayed message that is due and return when the next
    /// one will be.
    fn promote_due(&mut self, now: Instant) -> Option<Instant> {
        while let Some(front) = self.delayed.front() {
            if front.due > now {
                return Some(front.due);
            }
            if let Some(Delayed { message, .. }) = self.delayed.pop_front() {
                self.topics
                    .entry(message.topic.clone())
                    .or_default()
                    .push_back(message);
            }
        }
        None
    }

    fn pop(&mut self, topic: &str) -> Result<Option<RawMessage>, BusError> {
        if self.closed {
            return Err(BusError::Closed);
        }
        Ok(self.topics.get_mut(topic).and_then(VecDeque::pop_front))
    }
}

/// In-memory message bus bound to one consumer topic.
pub struct InMemoryBus {
    consumer_topic: String,
    dead_letter: Option<DeadLetterPolicy>,
    redelivery_delay: Duration,
    state: Mutex<BusState>,
    notify: Notify,
    produced: AtomicU64,
    acknowledged: AtomicU64,
    negatively_acknowledged: AtomicU64,
    dead_lettered: AtomicU64,
}

impl InMemoryBus {
    /// Create a bus whose [`BusClient::receive`] reads `consumer_topic`.
    #[must_use]
    pub fn new(consumer_topic: impl Into<String>) -> Self {
        Self {
            consumer_topic: consumer_topic.into(),
            dead_letter: None,
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
            state: Mutex::new(BusState::default()),
            notify: Notify::new(),
            produced: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            negatively_acknowledged: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    /// Enable dead-lettering.
    #[must_use]
    pub fn with_dead_letter(mut self, policy: DeadLetterPolicy) -> Self {
        self.dead_letter = Some(policy);
        self
    }

    /// Time a negatively acknowledged message waits before it can be
    /// received again.
    #[must_use]
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    #[must_use]
    pub fn consumer_topic(&self) -> &str {
        &self.consumer_topic
    }

    /// Dead-letter topic for `topic`.
    #[must_use]
    pub fn dead_letter_topic(topic: &str) -> String {
        format!("{topic}{DLQ_SUFFIX}")
    }

    /// Pop the next message from any topic, waiting up to `timeout`.
    ///
    /// This is a plain consumer view with no in-flight tracking, used to
    /// observe what was produced on a topic.
    pub async fn recv_from(&self, topic: &str, timeout: Duration) -> Option<RawMessage> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                state.promote_due(Instant::now());
                match state.pop(topic) {
                    Ok(Some(message)) => return Some(message),
                    Ok(None) => {}
                    Err(_) => return None,
                }
            }

            tokio::select! {
                _ = &mut notified => continue,
                _ = &mut deadline => return None,
            }
        }
    }

    /// Number of queued (not in flight) messages on `topic`.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.state.lock().topics.get(topic).map_or(0, VecDeque::len)
    }

    /// Number of negatively acknowledged messages waiting out their delay.
    #[must_use]
    pub fn delayed(&self) -> usize {
        self.state.lock().delayed.len()
    }

    /// Number of delivered but unsettled messages.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            produced: self.produced.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            negatively_acknowledged: self.negatively_acknowledged.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }

    fn settle(&self, state: &mut BusState, message: &RawMessage) -> Result<RawMessage, BusError> {
        if state.closed {
            return Err(BusError::Closed);
        }
        state
            .in_flight
            .remove(&message.id)
            .ok_or(BusError::UnknownMessage(message.id))
    }
}

#[async_trait]
impl BusClient for InMemoryBus {
    async fn receive(
        &self,
        timeout: Duration,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Received, BusError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.state.lock();
                let next_due = state.promote_due(Instant::now());
                if let Some(message) = state.pop(&self.consumer_topic)? {
                    state.in_flight.insert(message.id, message.clone());
                    debug!(
                        message_id = %message.id,
                        redelivery_count = message.redelivery_count,
                        "Message delivered"
                    );
                    return Ok(Received::Message(message));
                }
                next_due
            };

            let redelivery = async {
                match next_due {
                    Some(due) => tokio::time::sleep_until(due).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(redelivery);

            tokio::select! {
                biased;
                _ = shutdown.triggered() => return Ok(Received::Cancelled),
                _ = &mut notified => continue,
                _ = &mut redelivery => continue,
                _ = &mut deadline => return Ok(Received::Timeout),
            }
        }
    }

    async fn acknowledge(&self, message: &RawMessage) -> Result<(), BusError> {
        let mut state = self.state.lock();
        self.settle(&mut state, message)?;
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
        debug!(message_id = %message.id, "Message acknowledged");
        Ok(())
    }

    async fn negative_acknowledge(&self, message: &RawMessage) -> Result<(), BusError> {
        {
            let mut state = self.state.lock();
            let mut redelivery = self.settle(&mut state, message)?;
            self.negatively_acknowledged.fetch_add(1, Ordering::Relaxed);
            redelivery.redelivery_count += 1;

            let exhausted = self
                .dead_letter
                .as_ref()
                .is_some_and(|p| redelivery.redelivery_count > p.max_redeliveries);

            if exhausted {
                let dlq = Self::dead_letter_topic(&redelivery.topic);
                warn!(
                    message_id = %redelivery.id,
                    redelivery_count = redelivery.redelivery_count,
                    topic = %dlq,
                    "Redeliveries exhausted, routing to dead-letter topic"
                );
                redelivery.topic = dlq.clone();
                state.topics.entry(dlq).or_default().push_back(redelivery);
                self.dead_lettered.fetch_add(1, Ordering::Relaxed);
            } else {
                debug!(
                    message_id = %redelivery.id,
                    redelivery_count = redelivery.redelivery_count,
                    delay_ms = self.redelivery_delay.as_millis() as u64,
                    "Message scheduled for redelivery"
                );
                let due = Instant::now() + self.redelivery_delay;
                let at = state.delayed.partition_point(|d| d.due <= due);
                state.delayed.insert(
                    at,
                    Delayed {
                        due,
                        message: redelivery,
                    },
                );
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn produce(&self, topic: &str, message: OutboundMessage) -> Result<MessageId, BusError> {
        let id = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            state.next_id += 1;
            let id = MessageId(state.next_id);
            state.topics.entry(topic.to_string()).or_default().push_back(RawMessage {
                id,
                topic: topic.to_string(),
                properties: message.properties,
                payload: message.payload,
                redelivery_count: 0,
            });
            id
        };
        self.produced.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
        debug!(topic = topic, message_id = %id, "Message produced");
        Ok(id)
    }

    async fn close(&self) -> Result<(), BusError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            state.closed = true;
        }
        self.notify.notify_waiters();
        debug!(topic = %self.consumer_topic, "Bus closed");
        Ok(())
    }
}
