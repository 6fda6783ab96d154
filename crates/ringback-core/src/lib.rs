//! Core domain + application logic for the missed-call follow-up engine.
//!
//! This crate is intentionally framework-agnostic. Twilio and the HTTP surface
//! live behind ports (traits) implemented in adapter crates.

pub mod admin;
pub mod channel;
pub mod clock;
pub mod config;
pub mod consent;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod inbound;
pub mod logging;
pub mod messaging;
pub mod scheduler;
pub mod security;
pub mod session;
pub mod store;
pub mod telephony;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use errors::{Error, Result};
