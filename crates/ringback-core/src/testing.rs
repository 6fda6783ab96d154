//! Test doubles: a settable clock and recording gateways with failure injection.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
    clock::Clock,
    domain::{Channel, E164},
    errors::Error,
    messaging::{
        port::MessagingGateway,
        types::{SendReceipt, WhatsAppMessage},
    },
    telephony::{CallHandle, CallInstructions, TelephonyGateway},
    Result,
};

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: Channel,
    pub to: E164,
    /// Text as delivered (options flattened via `fallback_text`).
    pub text: String,
    pub whatsapp: Option<WhatsAppMessage>,
}

/// Records every send; recipients in `failing` get a gateway error instead.
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<HashSet<E164>>,
    counter: AtomicUsize,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fail_for(&self, to: &E164) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(to.clone());
    }

    pub fn recover(&self, to: &E164) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(to);
    }

    fn record(&self, msg: SentMessage) -> Result<SendReceipt> {
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&msg.to)
        {
            return Err(Error::Gateway(format!("simulated failure for {}", msg.to)));
        }
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(msg);
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SendReceipt {
            provider_id: format!("SM{n:04}"),
        })
    }
}

#[async_trait]
impl MessagingGateway for RecordingMessenger {
    async fn send_sms(&self, to: &E164, text: &str) -> Result<SendReceipt> {
        self.record(SentMessage {
            channel: Channel::Sms,
            to: to.clone(),
            text: text.to_string(),
            whatsapp: None,
        })
    }

    async fn send_whatsapp(&self, to: &E164, message: WhatsAppMessage) -> Result<SendReceipt> {
        self.record(SentMessage {
            channel: Channel::WhatsApp,
            to: to.clone(),
            text: message.fallback_text(),
            whatsapp: Some(message),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacedCall {
    pub to: E164,
    pub instructions: CallInstructions,
}

#[derive(Debug, Default)]
pub struct RecordingTelephony {
    calls: Mutex<Vec<PlacedCall>>,
    fail: Mutex<bool>,
}

impl RecordingTelephony {
    pub fn calls(&self) -> Vec<PlacedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }
}

#[async_trait]
impl TelephonyGateway for RecordingTelephony {
    async fn start_outbound(
        &self,
        to: &E164,
        instructions: CallInstructions,
    ) -> Result<CallHandle> {
        if *self.fail.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(Error::Gateway("simulated telephony failure".to_string()));
        }
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.push(PlacedCall {
            to: to.clone(),
            instructions,
        });
        Ok(CallHandle {
            call_sid: format!("CA-out-{}", calls.len()),
        })
    }
}
