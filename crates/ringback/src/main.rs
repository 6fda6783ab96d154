use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ringback_core::{
    clock::{Clock, SystemClock},
    config::Config,
    engine::OutreachEngine,
    messaging::{
        port::MessagingGateway,
        throttled::{ThrottleConfig, ThrottledGateway},
    },
    scheduler::FollowupSweep,
    security::{DisabledVerifier, SignatureVerifier, SlidingWindowLimiter, TwilioSignatureVerifier},
    store::{OutreachStore, SqliteStore},
};
use ringback_http::{AppState, HttpSettings};
use ringback_twilio::{TwilioClient, TwilioMessenger, TwilioTelephony};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ringback_core::logging::init("ringback")?;

    let cfg = Config::load()?;

    let store: Arc<dyn OutreachStore> = Arc::new(
        SqliteStore::open(&cfg.database_path)
            .with_context(|| format!("failed to open {}", cfg.database_path.display()))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let client = TwilioClient::new(&cfg.twilio.account_sid, &cfg.twilio.auth_token)?;
    let mut messenger: Arc<dyn MessagingGateway> =
        Arc::new(TwilioMessenger::new(client.clone(), &cfg.twilio));
    if let Some(interval) = cfg.outbound_min_interval {
        messenger = Arc::new(ThrottledGateway::new(
            messenger,
            ThrottleConfig::per_recipient(interval),
        ));
    }
    let telephony = Arc::new(TwilioTelephony::new(client, cfg.twilio.sms_from.clone()));

    let engine = OutreachEngine::new(
        store,
        messenger,
        telephony,
        clock.clone(),
        cfg.engine.clone(),
        cfg.timings,
    )
    .with_missed_call_min_duration(cfg.missed_call_min_duration);

    let sweep = FollowupSweep::new(engine.clone(), clock);
    let shutdown = CancellationToken::new();

    let scheduler = cfg
        .followup_sweep_interval
        .map(|every| sweep.spawn(every, shutdown.child_token()));

    let verifier: Arc<dyn SignatureVerifier> = if cfg.webhook_signature_verify {
        Arc::new(TwilioSignatureVerifier::new(cfg.twilio.auth_token.clone()))
    } else {
        warn!("webhook signature verification is disabled");
        Arc::new(DisabledVerifier)
    };
    if cfg.admin_api_token.is_none() {
        warn!("ADMIN_API_TOKEN not set; admin and sweep endpoints will reject all requests");
    }

    let state = AppState::new(
        engine,
        sweep,
        verifier,
        Arc::new(SlidingWindowLimiter::new(
            cfg.sweep_rate_limit_requests,
            cfg.sweep_rate_limit_window,
        )),
        HttpSettings {
            public_base_url: cfg.public_base_url.clone(),
            admin_token: cfg.admin_api_token.clone(),
        },
    );

    let listener = TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        signal_token.cancel();
    });

    ringback_http::serve(listener, state, shutdown.clone()).await?;

    if let Some(handle) = scheduler {
        shutdown.cancel();
        let _ = handle.await;
    }
    info!("ringback stopped");
    Ok(())
}
