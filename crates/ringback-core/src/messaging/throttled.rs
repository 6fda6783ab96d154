use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::E164,
    messaging::{
        port::MessagingGateway,
        types::{SendReceipt, WhatsAppMessage},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* provider calls (account-wide flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between messages to the same recipient.
    pub per_recipient_min_interval: Duration,
}

impl ThrottleConfig {
    pub fn per_recipient(interval: Duration) -> Self {
        Self {
            global_min_interval: Duration::from_millis(0),
            per_recipient_min_interval: interval,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(10), // ~100/sec account limit
            per_recipient_min_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingGateway decorator that spaces outbound sends.
///
/// Best-effort defense against provider 429s when a sweep fans out many nudges,
/// and against back-to-back messages landing on one handset out of order.
pub struct ThrottledGateway {
    inner: Arc<dyn MessagingGateway>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_recipient: Mutex<HashMap<E164, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledGateway {
    pub fn new(inner: Arc<dyn MessagingGateway>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_recipient: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, to: &E164) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_recipient.lock().await;
        // Idle limiters carry no pending slot; a fresh one behaves the same.
        let now = Instant::now();
        map.retain(|_, lim| {
            Arc::strong_count(lim) > 1 || lim.try_lock().map_or(true, |l| l.next > now)
        });
        map.entry(to.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_recipient_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle(&self, to: &E164) {
        let global_wait = { self.global.lock().await.reserve() };
        let recipient_wait = {
            let lim = self.limiter_for(to).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(recipient_wait);
        if wait > Duration::from_millis(0) {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingGateway for ThrottledGateway {
    async fn send_sms(&self, to: &E164, text: &str) -> Result<SendReceipt> {
        self.throttle(to).await;
        self.inner.send_sms(to, text).await
    }

    async fn send_whatsapp(&self, to: &E164, message: WhatsAppMessage) -> Result<SendReceipt> {
        self.throttle(to).await;
        self.inner.send_whatsapp(to, message).await
    }
}
