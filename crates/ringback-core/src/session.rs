//! Outreach session lifecycle on top of the store port.
//!
//! ```text
//! pending --(send succeeds)--> sent --(reply classified)--> responded
//! sent --(follow-up sweep)--> expired
//! {pending, sent} --(admin cancel)--> stopped
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::{
    channel::ChannelSelector,
    clock::Clock,
    domain::{OutreachSession, SessionId, SessionState, E164},
    errors::Error,
    store::OutreachStore,
    Result,
};

/// Time windows governing dedup, follow-up and reply attribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionTimings {
    /// `may_send_initial` blocks while an open session younger than this exists.
    pub dedup_window: Duration,
    /// `followup_due_at = last_sent_at + followup_delay`.
    pub followup_delay: Duration,
    /// Inbound replies attach to open sessions younger than this.
    pub reply_window: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            dedup_window: Duration::hours(24),
            followup_delay: Duration::hours(2),
            reply_window: Duration::hours(48),
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn OutreachStore>,
    selector: ChannelSelector,
    clock: Arc<dyn Clock>,
    timings: SessionTimings,
}

impl SessionStore {
    pub fn new(
        store: Arc<dyn OutreachStore>,
        selector: ChannelSelector,
        clock: Arc<dyn Clock>,
        timings: SessionTimings,
    ) -> Self {
        Self {
            store,
            selector,
            clock,
            timings,
        }
    }

    pub fn timings(&self) -> SessionTimings {
        self.timings
    }

    /// Idempotent on `call_sid`: the first call inserts a `pending` session on the
    /// selected channel, later calls return the stored row unchanged.
    pub async fn create_or_get_session(
        &self,
        call_sid: &str,
        e164: &E164,
        meta: serde_json::Value,
    ) -> Result<OutreachSession> {
        if call_sid.trim().is_empty() {
            return Err(Error::Validation("call_sid is required".to_string()));
        }
        let channel = self.selector.choose_channel(e164).await?;
        let candidate = OutreachSession {
            id: SessionId::generate(),
            call_sid: call_sid.to_string(),
            e164: e164.clone(),
            channel,
            state: SessionState::Pending,
            meta,
            created_at: self.clock.now(),
            last_sent_at: None,
            followup_due_at: None,
        };
        let candidate_id = candidate.id.clone();
        let stored = self.store.insert_session_if_absent(candidate).await?;
        if stored.id == candidate_id {
            info!(session_id = %stored.id, call_sid, %e164, %channel, "session created");
        } else {
            debug!(session_id = %stored.id, call_sid, "session already exists for call");
        }
        Ok(stored)
    }

    /// True iff no open session for `e164` was created within the dedup window.
    ///
    /// Read-then-act with no lock: two concurrent calls for the same number can
    /// both observe `true`.
    pub async fn may_send_initial(&self, e164: &E164) -> Result<bool> {
        let since = self.clock.now() - self.timings.dedup_window;
        Ok(self
            .store
            .latest_open_session_since(e164, since)
            .await?
            .is_none())
    }

    /// Newest open session within the reply window, for inbound attribution.
    pub async fn find_reply_target(&self, e164: &E164) -> Result<Option<OutreachSession>> {
        let since = self.clock.now() - self.timings.reply_window;
        self.store.latest_open_session_since(e164, since).await
    }

    pub async fn get(&self, id: &SessionId) -> Result<Option<OutreachSession>> {
        self.store.get_session(id).await
    }

    pub async fn require(&self, id: &SessionId) -> Result<OutreachSession> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    /// Move a `pending` session to `sent` and schedule its follow-up.
    ///
    /// A session that left `pending` in the meantime (an admin cancel racing the
    /// send) keeps its state; the returned row shows what is stored.
    pub async fn mark_sent(&self, id: &SessionId) -> Result<OutreachSession> {
        let now = self.clock.now();
        let due = now + self.timings.followup_delay;
        let changed = self.store.mark_sent(id, now, due).await?;
        let session = self.require(id).await?;
        if !changed {
            warn!(session_id = %id, state = %session.state, "session left pending during send; state kept");
        }
        Ok(session)
    }

    /// Only open sessions can become `responded`.
    pub async fn mark_responded(&self, id: &SessionId) -> Result<bool> {
        self.store
            .transition(
                id,
                &[SessionState::Pending, SessionState::Sent],
                SessionState::Responded,
            )
            .await
    }

    pub async fn mark_expired(&self, id: &SessionId) -> Result<bool> {
        self.store
            .transition(id, &[SessionState::Sent], SessionState::Expired)
            .await
    }

    /// Only open sessions can be stopped; returns whether the state changed.
    pub async fn mark_stopped(&self, id: &SessionId) -> Result<bool> {
        self.store
            .transition(
                id,
                &[SessionState::Pending, SessionState::Sent],
                SessionState::Stopped,
            )
            .await
    }

    pub async fn due_for_followup(&self, now: DateTime<Utc>) -> Result<Vec<OutreachSession>> {
        self.store.due_for_followup(now).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{consent::ConsentLedger, store::InMemoryStore, testing::ManualClock};

    fn fixture() -> (SessionStore, Arc<ManualClock>, Arc<InMemoryStore>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStore::new());
        let ledger = ConsentLedger::new(store.clone(), clock.clone());
        let selector = ChannelSelector::new(store.clone(), ledger);
        (
            SessionStore::new(store.clone(), selector, clock.clone(), SessionTimings::default()),
            clock,
            store,
        )
    }

    #[tokio::test]
    async fn create_is_idempotent_per_call_sid() {
        let (sessions, _, store) = fixture();
        let n = E164::parse("+15551234567").unwrap();

        let a = sessions
            .create_or_get_session("CA100", &n, json!({"n": 1}))
            .await
            .unwrap();
        let b = sessions
            .create_or_get_session("CA100", &n, json!({"n": 2}))
            .await
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(b.meta, json!({"n": 1}));
        assert_eq!(b.state, SessionState::Pending);
        let rows = store
            .list_sessions(&crate::store::SessionFilter {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn may_send_initial_reopens_after_dedup_window() {
        let (sessions, clock, _) = fixture();
        let n = E164::parse("+15551234567").unwrap();

        assert!(sessions.may_send_initial(&n).await.unwrap());
        sessions
            .create_or_get_session("CA1", &n, json!({}))
            .await
            .unwrap();
        assert!(!sessions.may_send_initial(&n).await.unwrap());

        clock.advance(Duration::hours(23) + Duration::minutes(59));
        assert!(!sessions.may_send_initial(&n).await.unwrap());

        clock.advance(Duration::minutes(1));
        assert!(sessions.may_send_initial(&n).await.unwrap());
    }

    #[tokio::test]
    async fn closed_sessions_do_not_block_initial() {
        let (sessions, _, _) = fixture();
        let n = E164::parse("+15551234567").unwrap();
        let s = sessions
            .create_or_get_session("CA1", &n, json!({}))
            .await
            .unwrap();
        assert!(sessions.mark_stopped(&s.id).await.unwrap());
        assert!(sessions.may_send_initial(&n).await.unwrap());
    }

    #[tokio::test]
    async fn mark_sent_schedules_followup_exactly_two_hours_out() {
        let (sessions, _, _) = fixture();
        let n = E164::parse("+15551234567").unwrap();
        let s = sessions
            .create_or_get_session("CA1", &n, json!({}))
            .await
            .unwrap();

        let sent = sessions.mark_sent(&s.id).await.unwrap();
        assert_eq!(sent.state, SessionState::Sent);
        let last = sent.last_sent_at.unwrap();
        assert_eq!(sent.followup_due_at.unwrap(), last + Duration::hours(2));
    }

    #[tokio::test]
    async fn stop_and_expire_respect_source_states() {
        let (sessions, _, _) = fixture();
        let n = E164::parse("+15551234567").unwrap();
        let s = sessions
            .create_or_get_session("CA1", &n, json!({}))
            .await
            .unwrap();

        // pending cannot expire
        assert!(!sessions.mark_expired(&s.id).await.unwrap());
        sessions.mark_sent(&s.id).await.unwrap();
        assert!(sessions.mark_responded(&s.id).await.unwrap());
        // responded is terminal for cancel
        assert!(!sessions.mark_stopped(&s.id).await.unwrap());
        assert_eq!(
            sessions.require(&s.id).await.unwrap().state,
            SessionState::Responded
        );
    }

    #[tokio::test]
    async fn stopped_session_is_not_revived_by_send_or_reply() {
        let (sessions, _, _) = fixture();
        let n = E164::parse("+15551234567").unwrap();
        let s = sessions
            .create_or_get_session("CA1", &n, json!({}))
            .await
            .unwrap();
        assert!(sessions.mark_stopped(&s.id).await.unwrap());

        let after_send = sessions.mark_sent(&s.id).await.unwrap();
        assert_eq!(after_send.state, SessionState::Stopped);
        assert!(after_send.followup_due_at.is_none());

        assert!(!sessions.mark_responded(&s.id).await.unwrap());
        assert_eq!(
            sessions.require(&s.id).await.unwrap().state,
            SessionState::Stopped
        );
    }

    #[tokio::test]
    async fn mark_sent_on_missing_session_is_not_found() {
        let (sessions, _, _) = fixture();
        let err = sessions
            .mark_sent(&SessionId("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
