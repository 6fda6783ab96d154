//! Outbound messaging gateway (SMS / WhatsApp) abstractions.

pub mod port;
pub mod throttled;
pub mod types;
