//! HTTP surface (axum): provider webhooks, admin API, follow-up sweep trigger.
//!
//! Webhooks acknowledge as soon as the request is authenticated; the engine
//! work runs on a `TaskTracker` and its failures only reach the logs.

pub mod error;
pub mod handlers;
pub mod router;

pub use router::{build_router, serve, AppState, HttpSettings};
