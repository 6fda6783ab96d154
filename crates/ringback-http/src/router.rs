use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

use ringback_core::{
    admin::AdminService,
    engine::OutreachEngine,
    inbound::InboundProcessor,
    scheduler::FollowupSweep,
    security::{RateLimiter, SignatureVerifier},
};

use crate::handlers;

/// Deployment-specific HTTP settings.
#[derive(Clone, Debug, Default)]
pub struct HttpSettings {
    /// Externally visible base URL; webhook signatures are computed over it.
    pub public_base_url: Option<String>,
    /// Bearer token for admin and sweep routes. `None` closes them.
    pub admin_token: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: OutreachEngine,
    pub inbound: InboundProcessor,
    pub admin: AdminService,
    pub sweep: FollowupSweep,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub sweep_limiter: Arc<dyn RateLimiter>,
    pub settings: Arc<HttpSettings>,
    /// Detached webhook work; drained on shutdown.
    pub tasks: TaskTracker,
}

impl AppState {
    pub fn new(
        engine: OutreachEngine,
        sweep: FollowupSweep,
        verifier: Arc<dyn SignatureVerifier>,
        sweep_limiter: Arc<dyn RateLimiter>,
        settings: HttpSettings,
    ) -> Self {
        Self {
            inbound: InboundProcessor::new(engine.clone()),
            admin: AdminService::new(engine.clone()),
            engine,
            sweep,
            verifier,
            sweep_limiter,
            settings: Arc::new(settings),
            tasks: TaskTracker::new(),
        }
    }

    /// Full public URL for a request path, as the provider signed it.
    pub fn public_url(&self, path_and_query: &str) -> String {
        match &self.settings.public_base_url {
            Some(base) => format!("{}{path_and_query}", base.trim_end_matches('/')),
            None => path_and_query.to_string(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/webhooks/voice/status", post(handlers::webhooks::voice_status))
        .route(
            "/webhooks/messaging/inbound",
            post(handlers::webhooks::messaging_inbound),
        )
        .route("/api/followups/run", post(handlers::admin::run_followups))
        .route("/api/admin/sessions", get(handlers::admin::list_sessions))
        .route("/api/admin/sessions/{id}", get(handlers::admin::session_detail))
        .route(
            "/api/admin/sessions/{id}/resend",
            post(handlers::admin::resend_session),
        )
        .route(
            "/api/admin/sessions/{id}/cancel",
            post(handlers::admin::cancel_session),
        )
        .route("/api/admin/consent", post(handlers::admin::set_consent))
        .with_state(state)
}

/// Serve until `shutdown` fires, then wait for detached webhook tasks to finish.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let local_addr = listener
        .local_addr()
        .context("failed to resolve listen address")?;
    info!(%local_addr, "http server listening");

    let tasks = state.tasks.clone();
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
    .context("http server exited unexpectedly")?;

    tasks.close();
    info!(pending = tasks.len(), "draining webhook tasks");
    tasks.wait().await;
    Ok(())
}
