//! Admin API and the follow-up sweep trigger. All routes require the bearer token.

use std::net::SocketAddr;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Path, Query, State,
    },
    http::{header::RETRY_AFTER, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use ringback_core::{
    admin::{ListQuery, SessionDetail, SessionPage},
    domain::SessionId,
    errors::Error,
    security::{is_authorized_bearer, RateDecision},
};

use crate::{
    error::{ApiError, ApiResult},
    router::AppState,
};

fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if is_authorized_bearer(header, state.settings.admin_token.as_deref()) {
        Ok(())
    } else {
        Err(Error::Security("missing or invalid admin token".to_string()).into())
    }
}

fn ok() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub async fn run_followups(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return e.into_response();
    }

    let key = peer.ip().to_string();
    if let RateDecision::Limited { retry_after } = state.sweep_limiter.check(&key) {
        warn!(caller = %key, "follow-up sweep rate limited");
        let secs = retry_after.as_secs().max(1).to_string();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(RETRY_AFTER, secs)],
            Json(json!({ "error": "rate limited" })),
        )
            .into_response();
    }

    match state.sweep.run_now().await {
        Ok(nudged) => Json(json!({ "nudged": nudged })).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub state: Option<String>,
    pub e164: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<SessionPage>> {
    require_admin(&state, &headers)?;
    let Query(params) = params?;
    let page = state
        .admin
        .list_sessions(ListQuery {
            state: params.state,
            e164: params.e164,
            limit: params.limit,
            offset: params.offset,
        })
        .await?;
    Ok(Json(page))
}

pub async fn session_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionDetail>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.admin.session_detail(&SessionId(id)).await?))
}

pub async fn resend_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    state.admin.resend(&SessionId(id)).await?;
    Ok(ok())
}

pub async fn cancel_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    state.admin.cancel(&SessionId(id)).await?;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct ConsentBody {
    pub e164: String,
    pub action: String,
    pub channel: String,
}

pub async fn set_consent(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ConsentBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let Json(body) = body?;
    state
        .admin
        .set_consent(&body.e164, &body.channel, &body.action)
        .await?;
    Ok(ok())
}
