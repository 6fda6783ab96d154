use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{errors::Error, Result};

// ============== Admin Authorization ==============

/// `Authorization: Bearer <token>` check. With no configured token the admin
/// surface is closed.
pub fn is_authorized_bearer(header: Option<&str>, expected: Option<&str>) -> bool {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return false;
    };
    let Some(presented) = header.and_then(|h| h.trim().strip_prefix("Bearer ")) else {
        return false;
    };
    constant_time_eq(presented.trim().as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============== Rate Limiting ==============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Per-key admission control. In-process implementations only; a shared
/// backend would implement the same trait for multi-instance deployments.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> RateDecision;
}

/// At most `max_requests` per key in any trailing `window`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        // Drop idle keys so the map does not grow with every caller ever seen.
        hits.retain(|_, q| {
            q.back()
                .is_some_and(|last| now.saturating_duration_since(*last) < self.window)
        });

        let q = hits.entry(key.to_string()).or_default();
        while q
            .front()
            .is_some_and(|first| now.saturating_duration_since(*first) >= self.window)
        {
            q.pop_front();
        }

        if q.len() < self.max_requests {
            q.push_back(now);
            return RateDecision::Allowed;
        }

        let retry_after = q
            .front()
            .map(|first| self.window.saturating_sub(now.saturating_duration_since(*first)))
            .unwrap_or(self.window);
        RateDecision::Limited { retry_after }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }
}

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Token bucket: bursts up to `max_tokens`, refilled evenly over `window`.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = max_tokens as f64;
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateDecision::Allowed;
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        RateDecision::Limited {
            retry_after: Duration::from_secs_f64(secs.max(0.0)),
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }
}

// ============== Webhook Signatures ==============

/// Authenticates provider callbacks before any state is touched.
pub trait SignatureVerifier: Send + Sync {
    /// `url` is the full public URL the provider posted to; `params` are the
    /// decoded form fields.
    fn verify(&self, url: &str, params: &[(String, String)], signature: Option<&str>)
        -> Result<()>;
}

/// Twilio `X-Twilio-Signature`: base64(HMAC-SHA1(auth_token, url + sorted key/value pairs)).
#[derive(Clone)]
pub struct TwilioSignatureVerifier {
    auth_token: String,
}

impl TwilioSignatureVerifier {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
        }
    }

    fn mac(&self, url: &str, params: &[(String, String)]) -> Result<Hmac<Sha1>> {
        let mut sorted: Vec<_> = params.iter().collect();
        sorted.sort();

        let mut mac = Hmac::<Sha1>::new_from_slice(self.auth_token.as_bytes())
            .map_err(|e| Error::Security(format!("invalid signing key: {e}")))?;
        mac.update(url.as_bytes());
        for (key, value) in sorted {
            mac.update(key.as_bytes());
            mac.update(value.as_bytes());
        }
        Ok(mac)
    }

    /// Signature the provider would send for this request.
    pub fn sign(&self, url: &str, params: &[(String, String)]) -> Result<String> {
        Ok(STANDARD.encode(self.mac(url, params)?.finalize().into_bytes()))
    }
}

impl SignatureVerifier for TwilioSignatureVerifier {
    fn verify(
        &self,
        url: &str,
        params: &[(String, String)],
        signature: Option<&str>,
    ) -> Result<()> {
        let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(Error::Security("missing webhook signature".to_string()));
        };
        let provided = STANDARD
            .decode(signature)
            .map_err(|_| Error::Security("malformed webhook signature".to_string()))?;
        self.mac(url, params)?
            .verify_slice(&provided)
            .map_err(|_| Error::Security("webhook signature mismatch".to_string()))
    }
}

/// Accepts everything. Local development only.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledVerifier;

impl SignatureVerifier for DisabledVerifier {
    fn verify(&self, _: &str, _: &[(String, String)], _: Option<&str>) -> Result<()> {
        Ok(())
    }
}
