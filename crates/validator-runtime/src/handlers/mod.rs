//! # Event Handlers
//!
//! `outcome` builds result events; `listener` runs the receive/settle loop.

pub mod listener;
pub mod outcome;

pub use listener::*;
pub use outcome::*;
