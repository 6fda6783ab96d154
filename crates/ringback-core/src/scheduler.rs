//! Periodic follow-up sweep.
//!
//! The sweep can be driven by the in-process interval loop, by the HTTP
//! trigger, or both; runs are serialized so two sweeps never overlap.

use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{clock::Clock, engine::OutreachEngine, Result};

#[derive(Clone)]
pub struct FollowupSweep {
    inner: Arc<SweepInner>,
}

struct SweepInner {
    engine: OutreachEngine,
    clock: Arc<dyn Clock>,
    running: Mutex<()>,
}

impl FollowupSweep {
    pub fn new(engine: OutreachEngine, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SweepInner {
                engine,
                clock,
                running: Mutex::new(()),
            }),
        }
    }

    /// Run one sweep at the current clock time; waits for any sweep already in progress.
    pub async fn run_now(&self) -> Result<usize> {
        let _guard = self.inner.running.lock().await;
        let now = self.inner.clock.now();
        self.inner.engine.run_due_followups(now).await
    }

    /// Sweep every `every` until `cancel` fires. The first sweep runs immediately.
    pub fn spawn(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let sweep = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = every.as_secs(), "follow-up scheduler started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = sweep.run_now().await {
                            warn!("scheduled follow-up sweep failed: {e}");
                        }
                    }
                }
            }

            info!("follow-up scheduler stopped");
        })
    }
}
