//! # Validator Runtime Library
//!
//! Message-driven relay: consumes "SIP unzipped" events, validates the SIP
//! found at the event's destination and publishes the validation outcome.
//!
//! ## Modules
//!
//! - `container/` - runtime configuration
//! - `adapters/` - filesystem resolver, external validator, startup probe
//! - `handlers/` - outcome builder and the event listener loop
//! - `telemetry` - logging setup
//!
//! ## Flow
//!
//! ```text
//! bus.receive ──→ decode ──→ outcome gate ──→ resolve root ──→ validate
//!                   │             │                │              │
//!                   │          dropped (ack)   no root: FAIL   SUCCESS
//!                   │                              └──────┬───────┘
//!                   ↓                                     ↓
//!              failed (nack)  ←── any error ──  encode + produce ──→ ack
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod adapters;
pub mod container;
pub mod handlers;
pub mod telemetry;

pub use adapters::{
    resolve_root, CommandProbe, CommandValidator, InvocationError, RuntimeProbe, SipValidator,
    StartupError, ValidationVerdict,
};
pub use container::{ConfigError, RuntimeConfig};
pub use handlers::{
    build_outcome, Disposition, EventListener, ListenerState, ListenerStats, ProcessingError,
    Settlement, ValidationResult, ValidationStep,
};
pub use telemetry::{init_logging, TelemetryConfig, TelemetryError};
