//! # Bus Events
//!
//! CloudEvents-style envelope carried over the bus, and the codec that turns
//! raw bus messages into [`Event`]s and back.
//!
//! ## Wire Shape
//!
//! Attributes travel as flat string properties on the message:
//!
//! | Property | Incoming | Outgoing |
//! |----------|----------|----------|
//! | `subject` | required | propagated |
//! | `correlation_id` | required | propagated |
//! | `outcome` | required (`success`/`fail`) | set by producer |
//! | `source`, `type`, `id`, `time` | optional | always set |
//!
//! The body is JSON of the form `{"data": {...}}`.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// CloudEvents spec version written on every outgoing event.
pub const SPEC_VERSION: &str = "1.0";

/// Content type of the event body.
pub const DATA_CONTENT_TYPE: &str = "application/json";

/// Property names used on the wire.
pub mod property {
    pub const ID: &str = "id";
    pub const SOURCE: &str = "source";
    pub const SPEC_VERSION: &str = "specversion";
    pub const TYPE: &str = "type";
    pub const DATA_CONTENT_TYPE: &str = "datacontenttype";
    pub const SUBJECT: &str = "subject";
    pub const TIME: &str = "time";
    pub const OUTCOME: &str = "outcome";
    pub const CORRELATION_ID: &str = "correlation_id";
}

/// Errors raised while decoding a raw message into an [`Event`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A required attribute is absent from the message properties.
    #[error("Missing required attribute `{0}`")]
    MissingAttribute(&'static str),

    /// The `outcome` attribute is not one of the known values.
    #[error("Invalid outcome `{0}`")]
    InvalidOutcome(String),

    /// The body is not valid JSON.
    #[error("Malformed event body: {0}")]
    MalformedBody(String),

    /// The body is JSON but has no `data` object.
    #[error("Event body has no `data` object")]
    MissingData,
}

/// Whether the producing stage completed its own logic.
///
/// This is independent of any business verdict carried in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOutcome {
    Success,
    Fail,
}

impl EventOutcome {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Success => "success",
            EventOutcome::Fail => "fail",
        }
    }

    /// Parse the wire representation (case-insensitive).
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(EventOutcome::Success),
            "fail" => Ok(EventOutcome::Fail),
            _ => Err(DecodeError::InvalidOutcome(raw.to_string())),
        }
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat metadata of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAttributes {
    /// Unique event id.
    pub id: String,
    /// Identifier of the producing application.
    pub source: String,
    /// CloudEvents `type`.
    pub event_type: String,
    /// Subject the event is about; propagated across stages.
    pub subject: String,
    /// Links a request event to its response event.
    pub correlation_id: String,
    /// Outcome of the producing stage.
    pub outcome: EventOutcome,
    /// RFC 3339 timestamp of creation.
    pub time: String,
}

impl EventAttributes {
    /// Attributes for a freshly produced event. A new id and timestamp are
    /// assigned.
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        subject: impl Into<String>,
        correlation_id: impl Into<String>,
        outcome: EventOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            subject: subject.into(),
            correlation_id: correlation_id.into(),
            outcome,
            time: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        }
    }
}

/// A decoded bus event: attributes plus the `data` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    attributes: EventAttributes,
    data: Map<String, Value>,
}

impl Event {
    pub fn new(attributes: EventAttributes, data: Map<String, Value>) -> Self {
        Self { attributes, data }
    }

    #[must_use]
    pub fn attributes(&self) -> &EventAttributes {
        &self.attributes
    }

    #[must_use]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.attributes.subject
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.attributes.correlation_id
    }

    #[must_use]
    pub fn outcome(&self) -> EventOutcome {
        self.attributes.outcome
    }

    /// True when the producing stage reported success.
    #[must_use]
    pub fn has_successful_outcome(&self) -> bool {
        self.attributes.outcome == EventOutcome::Success
    }
}

/// Broker-assigned identity of a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// A message ready to be handed to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub properties: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

/// A message as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: MessageId,
    pub topic: String,
    pub properties: BTreeMap<String, String>,
    pub payload: Vec<u8>,
    /// Number of times this message was handed out before.
    pub redelivery_count: u32,
}

impl RawMessage {
    /// Look up a single property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

fn required<'a>(
    properties: &'a BTreeMap<String, String>,
    name: &'static str,
) -> Result<&'a str, DecodeError> {
    properties
        .get(name)
        .map(String::as_str)
        .ok_or(DecodeError::MissingAttribute(name))
}

fn optional(properties: &BTreeMap<String, String>, name: &str) -> String {
    properties.get(name).cloned().unwrap_or_default()
}

/// Decode a delivered message into an [`Event`].
///
/// Fails without producing a partial event when a required attribute is
/// missing, the outcome is unknown, or the body is not `{"data": {...}}`.
pub fn decode(message: &RawMessage) -> Result<Event, DecodeError> {
    let props = &message.properties;
    let subject = required(props, property::SUBJECT)?;
    let correlation_id = required(props, property::CORRELATION_ID)?;
    let outcome = EventOutcome::parse(required(props, property::OUTCOME)?)?;

    let body: Value = serde_json::from_slice(&message.payload)
        .map_err(|e| DecodeError::MalformedBody(e.to_string()))?;
    let data = match body {
        Value::Object(mut root) => match root.remove("data") {
            Some(Value::Object(data)) => data,
            _ => return Err(DecodeError::MissingData),
        },
        _ => return Err(DecodeError::MissingData),
    };

    let attributes = EventAttributes {
        id: optional(props, property::ID),
        source: optional(props, property::SOURCE),
        event_type: optional(props, property::TYPE),
        subject: subject.to_string(),
        correlation_id: correlation_id.to_string(),
        outcome,
        time: optional(props, property::TIME),
    };

    Ok(Event::new(attributes, data))
}

/// Encode an [`Event`] for publication. Total for any well-formed event.
#[must_use]
pub fn encode(event: &Event) -> OutboundMessage {
    let attrs = event.attributes();
    let mut properties = BTreeMap::new();
    properties.insert(property::ID.to_string(), attrs.id.clone());
    properties.insert(property::SOURCE.to_string(), attrs.source.clone());
    properties.insert(property::SPEC_VERSION.to_string(), SPEC_VERSION.to_string());
    properties.insert(property::TYPE.to_string(), attrs.event_type.clone());
    properties.insert(
        property::DATA_CONTENT_TYPE.to_string(),
        DATA_CONTENT_TYPE.to_string(),
    );
    properties.insert(property::SUBJECT.to_string(), attrs.subject.clone());
    properties.insert(property::TIME.to_string(), attrs.time.clone());
    properties.insert(property::OUTCOME.to_string(), attrs.outcome.to_string());
    properties.insert(
        property::CORRELATION_ID.to_string(),
        attrs.correlation_id.clone(),
    );

    let mut body = Map::new();
    body.insert("data".to_string(), Value::Object(event.data().clone()));
    let payload = Value::Object(body).to_string().into_bytes();

    OutboundMessage {
        properties,
        payload,
    }
}
