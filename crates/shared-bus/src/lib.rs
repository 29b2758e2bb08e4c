//! # Shared Bus - Event Transport for the SIP Validation Relay
//!
//! Everything the relay needs to talk to a durable message bus without
//! depending on a concrete broker.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐   consumer topic   ┌──────────────┐   producer topic   ┌──────────────┐
//! │ Unzip stage  │ ─────────────────→ │  Validator   │ ─────────────────→ │ Downstream   │
//! │ (upstream)   │                    │   relay      │                    │ consumers    │
//! └──────────────┘                    └──────────────┘                    └──────────────┘
//!                                        │      ↑
//!                                  ack / nack   receive(timeout)
//! ```
//!
//! ## Modules
//!
//! - `events` - CloudEvents envelope and the raw-message codec
//! - `client` - the `BusClient` contract
//! - `memory` - single-process `InMemoryBus` with delayed redelivery and dead-lettering
//! - `shutdown` - cooperative stop signal passed into `receive`

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod events;
pub mod memory;
pub mod shutdown;

// Re-export main types
pub use client::{BusClient, BusError, Received};
pub use events::{
    decode, encode, DecodeError, Event, EventAttributes, EventOutcome, MessageId,
    OutboundMessage, RawMessage,
};
pub use memory::{BusStats, DeadLetterPolicy, InMemoryBus, DEFAULT_REDELIVERY_DELAY};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};

/// Suffix appended to a topic name to form its dead-letter topic.
pub const DLQ_SUFFIX: &str = "-DLQ";
