//! Provider callbacks: verify, acknowledge, then process in a detached task.

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Form,
};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use ringback_core::{engine::CallStatusEvent, inbound::InboundMessage};

use crate::router::AppState;

const SIGNATURE_HEADER: &str = "x-twilio-signature";
const EMPTY_TWIML: &str = "<Response/>";

type Params = Vec<(String, String)>;

fn twiml_ack() -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, "text/xml")], EMPTY_TWIML).into_response()
}

fn param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// `Err(response)` when the request is not signed by the provider.
fn verify(state: &AppState, uri: &Uri, headers: &HeaderMap, params: &Params) -> Result<(), Response> {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let url = state.public_url(path);
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    state
        .verifier
        .verify(&url, params, signature)
        .map_err(|e| {
            warn!(%url, "rejected webhook: {e}");
            StatusCode::FORBIDDEN.into_response()
        })
}

pub async fn voice_status(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<Params>,
) -> Response {
    if let Err(resp) = verify(&state, &uri, &headers, &params) {
        return resp;
    }

    let (Some(call_sid), Some(from)) = (param(&params, "CallSid"), param(&params, "From")) else {
        return (StatusCode::BAD_REQUEST, "CallSid and From are required").into_response();
    };

    let event = CallStatusEvent {
        call_sid: call_sid.to_string(),
        from: from.to_string(),
        direction: param(&params, "Direction").unwrap_or_default().to_string(),
        status: param(&params, "CallStatus").unwrap_or_default().to_string(),
        duration_secs: param(&params, "CallDuration").and_then(|d| d.parse().ok()),
        meta: Value::Object(
            params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<_, _>>(),
        ),
    };

    let engine = state.engine.clone();
    state.tasks.spawn(async move {
        let call_sid = event.call_sid.clone();
        let outcome = engine.on_missed_call(event).await;
        debug!(%call_sid, ?outcome, "call status processed");
    });

    twiml_ack()
}

pub async fn messaging_inbound(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<Params>,
) -> Response {
    if let Err(resp) = verify(&state, &uri, &headers, &params) {
        return resp;
    }

    let Some(from) = param(&params, "From") else {
        return (StatusCode::BAD_REQUEST, "From is required").into_response();
    };

    let message = InboundMessage {
        from: from.to_string(),
        body: param(&params, "Body").unwrap_or_default().to_string(),
        button_payload: param(&params, "ButtonPayload").map(str::to_string),
    };

    let inbound = state.inbound.clone();
    state.tasks.spawn(async move {
        let from = message.from.clone();
        match inbound.process(message).await {
            Ok(outcome) => debug!(%from, ?outcome, "inbound message processed"),
            Err(e) => error!(%from, "inbound message processing failed: {e}"),
        }
    });

    twiml_ack()
}
