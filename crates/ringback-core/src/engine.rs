//! Outreach orchestration: missed call -> initial message -> reply handling -> follow-up.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    channel::ChannelSelector,
    clock::Clock,
    consent::{ConsentLedger, ConsentSource},
    domain::{
        Channel, ConsentStatus, Direction, OutreachMessage, OutreachSession, ReplyEvent,
        ReplySignal, SessionId, SessionState, E164,
    },
    errors::Error,
    messaging::{
        port::{send_on_channel, MessagingGateway},
        types::{OptionButton, OutboundMessage},
    },
    session::{SessionStore, SessionTimings},
    store::OutreachStore,
    telephony::{bridge_twiml, CallInstructions, TelephonyGateway},
    Result,
};

const DEFAULT_MISSED_CALL_MIN_DURATION: Duration = Duration::from_secs(45);
const NAME_FALLBACK: &str = "there";

/// Business identity used in message copy and call bridging.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub business_name: String,
    /// Number rung first when a caller asks for a call back.
    pub business_number: E164,
    pub booking_url: String,
}

/// Call-status callback fields relevant to missed-call detection.
#[derive(Clone, Debug)]
pub struct CallStatusEvent {
    pub call_sid: String,
    pub from: String,
    pub direction: String,
    pub status: String,
    pub duration_secs: Option<u64>,
    /// Raw callback payload, stored on the session as-is.
    pub meta: serde_json::Value,
}

/// Inbound calls that were not answered, or were answered only briefly.
pub fn is_missed_call(
    direction: &str,
    status: &str,
    duration_secs: Option<u64>,
    min_duration: Duration,
) -> bool {
    if !direction.eq_ignore_ascii_case("inbound") {
        return false;
    }
    match status.to_ascii_lowercase().as_str() {
        "no-answer" | "busy" | "failed" => true,
        "completed" => Duration::from_secs(duration_secs.unwrap_or(0)) < min_duration,
        _ => false,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MissedCallOutcome {
    NotMissed,
    /// Caller number could not be normalized.
    Ignored,
    /// An open session for the number already exists within the dedup window.
    Deduplicated,
    Sent(SessionId),
    /// Session creation or the initial send failed; details are in the logs.
    Failed,
}

#[derive(Clone)]
pub struct OutreachEngine {
    store: Arc<dyn OutreachStore>,
    sessions: SessionStore,
    consent: ConsentLedger,
    messenger: Arc<dyn MessagingGateway>,
    telephony: Arc<dyn TelephonyGateway>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    missed_call_min_duration: Duration,
}

impl OutreachEngine {
    pub fn new(
        store: Arc<dyn OutreachStore>,
        messenger: Arc<dyn MessagingGateway>,
        telephony: Arc<dyn TelephonyGateway>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
        timings: SessionTimings,
    ) -> Self {
        let consent = ConsentLedger::new(store.clone(), clock.clone());
        let selector = ChannelSelector::new(store.clone(), consent.clone());
        let sessions = SessionStore::new(store.clone(), selector, clock.clone(), timings);
        Self {
            store,
            sessions,
            consent,
            messenger,
            telephony,
            clock,
            settings,
            missed_call_min_duration: DEFAULT_MISSED_CALL_MIN_DURATION,
        }
    }

    pub fn with_missed_call_min_duration(mut self, min: Duration) -> Self {
        self.missed_call_min_duration = min;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn consent(&self) -> &ConsentLedger {
        &self.consent
    }

    pub fn store(&self) -> &Arc<dyn OutreachStore> {
        &self.store
    }

    /// Entry point for call-status callbacks. Never returns an error: failures
    /// are logged and reported as `Failed`.
    pub async fn on_missed_call(&self, event: CallStatusEvent) -> MissedCallOutcome {
        if !is_missed_call(
            &event.direction,
            &event.status,
            event.duration_secs,
            self.missed_call_min_duration,
        ) {
            debug!(
                call_sid = %event.call_sid,
                status = %event.status,
                direction = %event.direction,
                "call not treated as missed"
            );
            return MissedCallOutcome::NotMissed;
        }

        let e164 = match E164::parse(&event.from) {
            Ok(n) => n,
            Err(e) => {
                warn!(call_sid = %event.call_sid, from = %event.from, "ignoring missed call: {e}");
                return MissedCallOutcome::Ignored;
            }
        };

        match self.start_outreach(&event.call_sid, &e164, event.meta).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(call_sid = %event.call_sid, %e164, "missed-call outreach failed: {e}");
                MissedCallOutcome::Failed
            }
        }
    }

    async fn start_outreach(
        &self,
        call_sid: &str,
        e164: &E164,
        meta: serde_json::Value,
    ) -> Result<MissedCallOutcome> {
        if !self.sessions.may_send_initial(e164).await? {
            info!(call_sid, %e164, "open session exists; skipping initial message");
            return Ok(MissedCallOutcome::Deduplicated);
        }

        let session = self
            .sessions
            .create_or_get_session(call_sid, e164, meta)
            .await?;
        if session.state != SessionState::Pending {
            return Ok(MissedCallOutcome::Deduplicated);
        }

        let sent = self.send_initial(&session).await?;
        Ok(MissedCallOutcome::Sent(sent.id))
    }

    /// Send the opening message and mark the session `sent`.
    ///
    /// A failed send leaves the session `pending` and returns the gateway error.
    pub async fn send_initial(&self, session: &OutreachSession) -> Result<OutreachSession> {
        self.deliver_initial(session).await?;
        let sent = self.sessions.mark_sent(&session.id).await?;
        info!(session_id = %sent.id, channel = %sent.channel, state = %sent.state, "initial message sent");
        Ok(sent)
    }

    /// Admin escape hatch: re-deliver the opening message.
    ///
    /// `pending` sessions go through the normal send path and become `sent`;
    /// any other non-stopped state is left untouched.
    pub async fn resend_initial(&self, id: &SessionId) -> Result<OutreachSession> {
        let session = self.sessions.require(id).await?;
        match session.state {
            SessionState::Stopped => Err(Error::Conflict(format!(
                "session {id} is stopped; cannot resend"
            ))),
            SessionState::Pending => self.send_initial(&session).await,
            _ => {
                self.deliver_initial(&session).await?;
                info!(session_id = %id, state = %session.state, "initial message re-sent");
                Ok(session)
            }
        }
    }

    async fn deliver_initial(&self, session: &OutreachSession) -> Result<()> {
        let name = self.display_name(&session.e164).await?;
        let message = initial_message(&name, &self.settings.business_name);
        self.send_and_log(session, message).await
    }

    async fn display_name(&self, e164: &E164) -> Result<String> {
        Ok(self
            .store
            .get_contact(e164)
            .await?
            .and_then(|c| c.first_name)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| NAME_FALLBACK.to_string()))
    }

    async fn send_and_log(&self, session: &OutreachSession, message: OutboundMessage) -> Result<()> {
        let body = message.log_body(session.channel);
        let receipt =
            send_on_channel(self.messenger.as_ref(), session.channel, &session.e164, message)
                .await?;
        debug!(session_id = %session.id, provider_id = %receipt.provider_id, "message accepted");
        self.log_message(&session.id, Direction::Out, body).await
    }

    async fn log_message(&self, session_id: &SessionId, direction: Direction, body: String) -> Result<()> {
        self.store
            .append_message(OutreachMessage {
                session_id: session_id.clone(),
                direction,
                body,
                created_at: self.clock.now(),
            })
            .await
    }

    /// Act on a classified reply and mark the session `responded`.
    ///
    /// `"1"` bridges a call, `"2"` sends the booking link, anything else is kept
    /// as a note.
    ///
    /// The call-back rings `business_number` first; its TwiML then dials the
    /// caller, so the business is already on the line when the caller picks
    /// up. Nothing here dials the business from the caller's leg.
    ///
    /// A session closed after lookup (admin cancel) keeps its terminal state;
    /// the reply event is still recorded.
    pub async fn handle_reply(&self, session: &OutreachSession, input: &str) -> Result<ReplySignal> {
        let normalized = input.trim().to_lowercase();
        let signal = match normalized.as_str() {
            "1" => {
                let handle = self
                    .telephony
                    .start_outbound(
                        &self.settings.business_number,
                        CallInstructions::Twiml(bridge_twiml(&session.e164)),
                    )
                    .await?;
                info!(session_id = %session.id, call_sid = %handle.call_sid, "call back bridge started");
                ReplySignal::CallRequest
            }
            "2" => {
                let link = booking_link(&self.settings.booking_url, &session.e164);
                let text = format!("Great! Pick a time that works for you: {link}");
                self.send_and_log(session, OutboundMessage::Text(text)).await?;
                ReplySignal::BookingRequest
            }
            _ => {
                self.log_message(&session.id, Direction::In, input.trim().to_string())
                    .await?;
                ReplySignal::Note
            }
        };

        self.store
            .append_reply_event(ReplyEvent {
                session_id: session.id.clone(),
                signal,
                created_at: self.clock.now(),
            })
            .await?;
        if !self.sessions.mark_responded(&session.id).await? {
            info!(session_id = %session.id, "session closed before reply; state kept");
        }
        info!(session_id = %session.id, %signal, "reply handled");
        Ok(signal)
    }

    pub async fn apply_opt_status(
        &self,
        e164: &E164,
        channel: Channel,
        status: ConsentStatus,
        source: ConsentSource,
    ) -> Result<()> {
        self.consent
            .record_consent(e164, channel, status, source)
            .await
    }

    /// Nudge every session due at `now`, then expire it.
    ///
    /// Sessions are processed one at a time; a failure is logged and does not
    /// stop the batch. Returns how many were nudged.
    pub async fn run_due_followups(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.sessions.due_for_followup(now).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut nudged = 0usize;
        for session in &due {
            match self.nudge(session).await {
                Ok(()) => nudged += 1,
                Err(e) => {
                    warn!(session_id = %session.id, e164 = %session.e164, "follow-up failed: {e}");
                }
            }
        }
        info!(due = due.len(), nudged, "follow-up sweep finished");
        Ok(nudged)
    }

    async fn nudge(&self, session: &OutreachSession) -> Result<()> {
        self.send_and_log(session, nudge_message(session.channel))
            .await?;
        self.sessions.mark_expired(&session.id).await?;
        Ok(())
    }
}

fn reply_options() -> Vec<OptionButton> {
    [("1", "Call now"), ("2", "Book time"), ("3", "Leave note")]
        .into_iter()
        .map(|(id, label)| OptionButton {
            id: id.to_string(),
            label: label.to_string(),
        })
        .collect()
}

fn initial_message(name: &str, business: &str) -> OutboundMessage {
    let greeting = format!("Hi {name}, this is {business}. Sorry we missed your call!");
    OutboundMessage::Options {
        body: format!("{greeting} How can we help?"),
        buttons: reply_options(),
        sms_text: format!(
            "{greeting} Reply 1 for a call back now, 2 to book a time, or 3 to leave a note. \
             Reply STOP to opt out."
        ),
    }
}

fn nudge_message(channel: Channel) -> OutboundMessage {
    let text = "Still need help? Reply 1 for a call back, 2 to book a time, or 3 to leave a note.";
    match channel {
        Channel::Sms => OutboundMessage::Text(format!("{text} Reply STOP to opt out.")),
        Channel::WhatsApp => OutboundMessage::Text(text.to_string()),
    }
}

fn booking_link(base: &str, e164: &E164) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}phone={}", urlencoding::encode(e164.as_str()))
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::{
        domain::Contact,
        store::InMemoryStore,
        testing::{ManualClock, RecordingMessenger, RecordingTelephony},
    };

    struct Harness {
        engine: OutreachEngine,
        store: Arc<InMemoryStore>,
        messenger: Arc<RecordingMessenger>,
        telephony: Arc<RecordingTelephony>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let messenger = Arc::new(RecordingMessenger::default());
        let telephony = Arc::new(RecordingTelephony::default());
        let clock = Arc::new(ManualClock::default());
        let engine = OutreachEngine::new(
            store.clone(),
            messenger.clone(),
            telephony.clone(),
            clock.clone(),
            EngineSettings {
                business_name: "Acme Plumbing".to_string(),
                business_number: E164::parse("+15550002000").unwrap(),
                booking_url: "https://book.example.com/slots".to_string(),
            },
            SessionTimings::default(),
        );
        Harness {
            engine,
            store,
            messenger,
            telephony,
            clock,
        }
    }

    fn missed(call_sid: &str, from: &str) -> CallStatusEvent {
        CallStatusEvent {
            call_sid: call_sid.to_string(),
            from: from.to_string(),
            direction: "inbound".to_string(),
            status: "no-answer".to_string(),
            duration_secs: Some(10),
            meta: json!({ "CallSid": call_sid }),
        }
    }

    async fn sent_session(h: &Harness, call_sid: &str, from: &str) -> OutreachSession {
        let MissedCallOutcome::Sent(id) = h.engine.on_missed_call(missed(call_sid, from)).await
        else {
            panic!("expected initial message to be sent");
        };
        h.engine.sessions().require(&id).await.unwrap()
    }

    #[test]
    fn missed_call_rules() {
        let min = DEFAULT_MISSED_CALL_MIN_DURATION;
        assert!(is_missed_call("inbound", "no-answer", None, min));
        assert!(is_missed_call("inbound", "busy", Some(0), min));
        assert!(is_missed_call("inbound", "failed", None, min));
        assert!(is_missed_call("inbound", "completed", Some(44), min));
        assert!(!is_missed_call("inbound", "completed", Some(45), min));
        assert!(!is_missed_call("outbound-api", "no-answer", None, min));
        assert!(!is_missed_call("inbound", "ringing", None, min));
    }

    #[test]
    fn booking_link_appends_phone_parameter() {
        let n = E164::parse("+15551234567").unwrap();
        assert_eq!(
            booking_link("https://book.example.com/slots", &n),
            "https://book.example.com/slots?phone=%2B15551234567"
        );
        assert_eq!(
            booking_link("https://book.example.com/?src=sms", &n),
            "https://book.example.com/?src=sms&phone=%2B15551234567"
        );
    }

    #[tokio::test]
    async fn missed_call_then_booking_reply() {
        let h = harness();
        let session = sent_session(&h, "CA1", "+15551234567").await;

        assert_eq!(session.state, SessionState::Sent);
        assert_eq!(session.channel, Channel::Sms);
        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.starts_with("Hi there, this is Acme Plumbing."));
        assert!(sent[0].text.contains("Reply STOP to opt out."));

        let signal = h.engine.handle_reply(&session, "2").await.unwrap();
        assert_eq!(signal, ReplySignal::BookingRequest);

        let after = h.engine.sessions().require(&session.id).await.unwrap();
        assert_eq!(after.state, SessionState::Responded);
        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1]
            .text
            .contains("https://book.example.com/slots?phone=%2B15551234567"));

        let events = h.store.reply_events_for(&session.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].signal, ReplySignal::BookingRequest);
        let messages = h.store.messages_for(&session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.direction == Direction::Out));
    }

    #[tokio::test]
    async fn whatsapp_contact_gets_options_with_name() {
        let h = harness();
        let n = E164::parse("+15559876543").unwrap();
        h.store
            .upsert_contact(Contact {
                e164: n.clone(),
                wa_capable: true,
                first_name: Some("Ada".to_string()),
            })
            .await
            .unwrap();

        let session = sent_session(&h, "CA1", "+15559876543").await;
        assert_eq!(session.channel, Channel::WhatsApp);

        let sent = h.messenger.sent();
        let Some(crate::messaging::types::WhatsAppMessage::Options { body, buttons }) =
            &sent[0].whatsapp
        else {
            panic!("expected an options message");
        };
        assert!(body.starts_with("Hi Ada, this is Acme Plumbing."));
        let labels: Vec<_> = buttons.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["Call now", "Book time", "Leave note"]);
    }

    #[tokio::test]
    async fn answered_call_is_not_missed() {
        let h = harness();
        let mut event = missed("CA1", "+15551234567");
        event.status = "completed".to_string();
        event.duration_secs = Some(120);
        assert_eq!(h.engine.on_missed_call(event).await, MissedCallOutcome::NotMissed);
        assert!(h.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn second_missed_call_within_window_is_deduplicated() {
        let h = harness();
        sent_session(&h, "CA1", "+15551234567").await;

        let outcome = h.engine.on_missed_call(missed("CA2", "+15551234567")).await;
        assert_eq!(outcome, MissedCallOutcome::Deduplicated);
        // redelivery of the same callback
        let outcome = h.engine.on_missed_call(missed("CA1", "+15551234567")).await;
        assert_eq!(outcome, MissedCallOutcome::Deduplicated);
        assert_eq!(h.messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_initial_send_leaves_session_pending() {
        let h = harness();
        let n = E164::parse("+15551234567").unwrap();
        h.messenger.fail_for(&n);

        let outcome = h.engine.on_missed_call(missed("CA1", "+15551234567")).await;
        assert_eq!(outcome, MissedCallOutcome::Failed);

        let session = h
            .engine
            .sessions()
            .create_or_get_session("CA1", &n, json!({}))
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::Pending);
        assert!(session.last_sent_at.is_none());

        let err = h.engine.send_initial(&session).await.unwrap_err();
        assert!(matches!(err, Error::Gateway(_)));
        assert!(h.store.messages_for(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn call_now_reply_places_one_bridge_call() {
        let h = harness();
        let session = sent_session(&h, "CA1", "+15551234567").await;

        let signal = h.engine.handle_reply(&session, " 1 ").await.unwrap();
        assert_eq!(signal, ReplySignal::CallRequest);

        let calls = h.telephony.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to.as_str(), "+15550002000");
        let CallInstructions::Twiml(twiml) = &calls[0].instructions else {
            panic!("expected inline TwiML");
        };
        assert!(twiml.contains("<Number>+15551234567</Number>"));

        let events = h.store.reply_events_for(&session.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].signal, ReplySignal::CallRequest);
        assert_eq!(
            h.engine.sessions().require(&session.id).await.unwrap().state,
            SessionState::Responded
        );
    }

    #[tokio::test]
    async fn failed_bridge_call_does_not_mark_responded() {
        let h = harness();
        let session = sent_session(&h, "CA1", "+15551234567").await;
        h.telephony.set_failing(true);

        assert!(h.engine.handle_reply(&session, "1").await.is_err());
        assert_eq!(
            h.engine.sessions().require(&session.id).await.unwrap().state,
            SessionState::Sent
        );
        assert!(h.store.reply_events_for(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_after_cancel_keeps_session_stopped() {
        let h = harness();
        let session = sent_session(&h, "CA1", "+15551234567").await;
        assert!(h.engine.sessions().mark_stopped(&session.id).await.unwrap());

        h.engine.handle_reply(&session, "hello").await.unwrap();
        assert_eq!(
            h.engine.sessions().require(&session.id).await.unwrap().state,
            SessionState::Stopped
        );
    }

    #[tokio::test]
    async fn cancel_during_initial_send_is_not_undone() {
        let h = harness();
        let n = E164::parse("+15551234567").unwrap();
        let session = h
            .engine
            .sessions()
            .create_or_get_session("CA1", &n, json!({}))
            .await
            .unwrap();
        assert!(h.engine.sessions().mark_stopped(&session.id).await.unwrap());

        let after = h.engine.send_initial(&session).await.unwrap();
        assert_eq!(after.state, SessionState::Stopped);
        assert!(after.followup_due_at.is_none());

        h.clock.advance(ChronoDuration::hours(3));
        assert_eq!(h.engine.run_due_followups(h.clock.now()).await.unwrap(), 0);
        assert_eq!(h.messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn free_text_reply_is_logged_as_note() {
        let h = harness();
        let session = sent_session(&h, "CA1", "+15551234567").await;

        let signal = h
            .engine
            .handle_reply(&session, "Leaking pipe under the sink")
            .await
            .unwrap();
        assert_eq!(signal, ReplySignal::Note);

        let messages = h.store.messages_for(&session.id).await.unwrap();
        let inbound: Vec<_> = messages
            .iter()
            .filter(|m| m.direction == Direction::In)
            .collect();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].body, "Leaking pipe under the sink");
    }

    #[tokio::test]
    async fn followups_only_touch_due_sent_sessions_and_isolate_failures() {
        let h = harness();
        let due_ok = sent_session(&h, "CA1", "+15551230001").await;
        let due_fail = sent_session(&h, "CA2", "+15551230002").await;
        let responded = sent_session(&h, "CA3", "+15551230003").await;
        h.engine.handle_reply(&responded, "3").await.unwrap();

        h.clock.advance(ChronoDuration::minutes(90));
        let not_yet = sent_session(&h, "CA4", "+15551230004").await;
        let pending = h
            .engine
            .sessions()
            .create_or_get_session("CA5", &E164::parse("+15551230005").unwrap(), json!({}))
            .await
            .unwrap();

        h.clock.advance(ChronoDuration::minutes(30));
        h.messenger.fail_for(&due_fail.e164);
        let before = h.messenger.sent().len();

        let nudged = h.engine.run_due_followups(h.clock.now()).await.unwrap();
        assert_eq!(nudged, 1);
        assert_eq!(h.messenger.sent().len(), before + 1);
        assert!(h.messenger.sent()[before].text.starts_with("Still need help?"));

        let state = |id: SessionId| {
            let sessions = h.engine.sessions().clone();
            async move { sessions.require(&id).await.unwrap().state }
        };
        assert_eq!(state(due_ok.id).await, SessionState::Expired);
        assert_eq!(state(due_fail.id).await, SessionState::Sent);
        assert_eq!(state(responded.id).await, SessionState::Responded);
        assert_eq!(state(not_yet.id).await, SessionState::Sent);
        assert_eq!(state(pending.id).await, SessionState::Pending);
    }

    #[tokio::test]
    async fn resend_respects_stopped_and_keeps_state() {
        let h = harness();
        let session = sent_session(&h, "CA1", "+15551234567").await;
        h.engine.handle_reply(&session, "2").await.unwrap();

        let resent = h.engine.resend_initial(&session.id).await.unwrap();
        assert_eq!(resent.state, SessionState::Responded);
        assert_eq!(h.messenger.sent().len(), 3);

        let other = sent_session(&h, "CA2", "+15550009999").await;
        assert!(h.engine.sessions().mark_stopped(&other.id).await.unwrap());
        let err = h.engine.resend_initial(&other.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let err = h
            .engine
            .resend_initial(&SessionId("missing".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn resend_of_pending_session_marks_sent() {
        let h = harness();
        let n = E164::parse("+15551234567").unwrap();
        h.messenger.fail_for(&n);
        h.engine.on_missed_call(missed("CA1", "+15551234567")).await;
        h.messenger.recover(&n);

        let pending = h
            .engine
            .sessions()
            .create_or_get_session("CA1", &n, json!({}))
            .await
            .unwrap();
        let resent = h.engine.resend_initial(&pending.id).await.unwrap();
        assert_eq!(resent.state, SessionState::Sent);
        assert!(resent.followup_due_at.is_some());
    }
}
