pub mod admin;
pub mod webhooks;

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}
