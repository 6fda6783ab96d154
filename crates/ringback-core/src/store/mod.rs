//! Persistence port for contacts, consent, sessions and their audit trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{
        Channel, ConsentRecord, ConsentStatus, Contact, OutreachMessage, OutreachSession,
        ReplyEvent, SessionId, SessionState, E164,
    },
    Result,
};

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Admin list query. `e164_contains` is a plain substring match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub state: Option<SessionState>,
    pub e164_contains: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Async store contract used by the engine and admin surface.
///
/// Implementations must guarantee at most one session per `call_sid` and atomic
/// single-row updates; nothing here spans more than one session.
#[async_trait]
pub trait OutreachStore: Send + Sync {
    async fn get_contact(&self, e164: &E164) -> Result<Option<Contact>>;
    async fn upsert_contact(&self, contact: Contact) -> Result<()>;

    async fn append_consent(&self, record: ConsentRecord) -> Result<()>;
    /// Status of the most recently created record for the pair, if any.
    async fn latest_consent(&self, e164: &E164, channel: Channel)
        -> Result<Option<ConsentStatus>>;

    /// Insert `session` unless a row with the same `call_sid` exists; either way
    /// return the stored row.
    async fn insert_session_if_absent(&self, session: OutreachSession) -> Result<OutreachSession>;
    async fn get_session(&self, id: &SessionId) -> Result<Option<OutreachSession>>;
    /// Newest open (`pending`/`sent`) session for `e164` created strictly after `since`.
    async fn latest_open_session_since(
        &self,
        e164: &E164,
        since: DateTime<Utc>,
    ) -> Result<Option<OutreachSession>>;
    /// Set `state = sent` with the given send and follow-up timestamps, only
    /// while the session is still `pending`. Returns whether a row changed.
    async fn mark_sent(
        &self,
        id: &SessionId,
        sent_at: DateTime<Utc>,
        followup_due_at: DateTime<Utc>,
    ) -> Result<bool>;
    /// Move to `to` only if the current state is one of `from`.
    /// Returns whether a row changed.
    async fn transition(
        &self,
        id: &SessionId,
        from: &[SessionState],
        to: SessionState,
    ) -> Result<bool>;
    /// `state = sent` and `followup_due_at <= now`, oldest due first.
    async fn due_for_followup(&self, now: DateTime<Utc>) -> Result<Vec<OutreachSession>>;
    /// Newest first.
    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<OutreachSession>>;

    async fn append_message(&self, message: OutreachMessage) -> Result<()>;
    /// Oldest first.
    async fn messages_for(&self, session_id: &SessionId) -> Result<Vec<OutreachMessage>>;

    async fn append_reply_event(&self, event: ReplyEvent) -> Result<()>;
    /// Oldest first.
    async fn reply_events_for(&self, session_id: &SessionId) -> Result<Vec<ReplyEvent>>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behavior every store backend must share.

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::domain::{Direction, ReplySignal};

    pub fn session(call_sid: &str, e164: &str, created_at: DateTime<Utc>) -> OutreachSession {
        OutreachSession {
            id: SessionId::generate(),
            call_sid: call_sid.to_string(),
            e164: E164::parse(e164).unwrap(),
            channel: Channel::Sms,
            state: SessionState::Pending,
            meta: json!({ "To": "+15550000000" }),
            created_at,
            last_sent_at: None,
            followup_due_at: None,
        }
    }

    pub async fn insert_is_idempotent_per_call_sid(store: &dyn OutreachStore) {
        let now = Utc::now();
        let first = store
            .insert_session_if_absent(session("CA1", "+15551234567", now))
            .await
            .unwrap();
        let second = store
            .insert_session_if_absent(session("CA1", "+15551234567", now))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.meta, json!({ "To": "+15550000000" }));

        let all = store
            .list_sessions(&SessionFilter {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    pub async fn latest_consent_wins(store: &dyn OutreachStore) {
        let e164 = E164::parse("+15559876543").unwrap();
        let t0 = Utc::now();
        assert_eq!(
            store.latest_consent(&e164, Channel::WhatsApp).await.unwrap(),
            None
        );
        for (offset, status) in [(0, ConsentStatus::OptIn), (5, ConsentStatus::OptOut)] {
            store
                .append_consent(ConsentRecord {
                    e164: e164.clone(),
                    channel: Channel::WhatsApp,
                    status,
                    source: "test".to_string(),
                    created_at: t0 + Duration::seconds(offset),
                })
                .await
                .unwrap();
        }
        assert_eq!(
            store.latest_consent(&e164, Channel::WhatsApp).await.unwrap(),
            Some(ConsentStatus::OptOut)
        );
        assert_eq!(store.latest_consent(&e164, Channel::Sms).await.unwrap(), None);
    }

    pub async fn open_session_lookup_respects_window_and_state(store: &dyn OutreachStore) {
        let now = Utc::now();
        let e164 = E164::parse("+15551234567").unwrap();
        let old = store
            .insert_session_if_absent(session("CA-old", "+15551234567", now - Duration::hours(50)))
            .await
            .unwrap();
        let newer = store
            .insert_session_if_absent(session("CA-new", "+15551234567", now - Duration::hours(1)))
            .await
            .unwrap();

        let found = store
            .latest_open_session_since(&e164, now - Duration::hours(48))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);

        assert!(store
            .transition(&newer.id, &[SessionState::Pending], SessionState::Stopped)
            .await
            .unwrap());
        assert!(store
            .latest_open_session_since(&e164, now - Duration::hours(48))
            .await
            .unwrap()
            .is_none());
        let still_old = store
            .latest_open_session_since(&e164, now - Duration::hours(72))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(still_old.id, old.id);
    }

    pub async fn transition_is_conditional(store: &dyn OutreachStore) {
        let s = store
            .insert_session_if_absent(session("CA2", "+15551234567", Utc::now()))
            .await
            .unwrap();
        assert!(!store
            .transition(&s.id, &[SessionState::Sent], SessionState::Expired)
            .await
            .unwrap());
        assert!(!store
            .transition(
                &SessionId("missing".to_string()),
                SessionState::ALL,
                SessionState::Stopped
            )
            .await
            .unwrap());
        let reloaded = store.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, SessionState::Pending);
    }

    pub async fn mark_sent_only_moves_pending(store: &dyn OutreachStore) {
        let now = Utc::now();
        let s = store
            .insert_session_if_absent(session("CA-stop", "+15551234567", now))
            .await
            .unwrap();
        assert!(store
            .transition(&s.id, &[SessionState::Pending], SessionState::Stopped)
            .await
            .unwrap());

        assert!(!store
            .mark_sent(&s.id, now, now + Duration::hours(2))
            .await
            .unwrap());
        let reloaded = store.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, SessionState::Stopped);
        assert!(reloaded.last_sent_at.is_none());
        assert!(reloaded.followup_due_at.is_none());

        let fresh = store
            .insert_session_if_absent(session("CA-fresh", "+15551234568", now))
            .await
            .unwrap();
        assert!(store
            .mark_sent(&fresh.id, now, now + Duration::hours(2))
            .await
            .unwrap());
        assert!(!store
            .mark_sent(&fresh.id, now + Duration::hours(1), now + Duration::hours(3))
            .await
            .unwrap());
        let reloaded = store.get_session(&fresh.id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.last_sent_at.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }

    pub async fn due_for_followup_filters_state_and_time(store: &dyn OutreachStore) {
        let now = Utc::now();
        let due = store
            .insert_session_if_absent(session("CA-due", "+15551230001", now))
            .await
            .unwrap();
        let later = store
            .insert_session_if_absent(session("CA-later", "+15551230002", now))
            .await
            .unwrap();
        let pending = store
            .insert_session_if_absent(session("CA-pending", "+15551230003", now))
            .await
            .unwrap();

        store
            .mark_sent(&due.id, now - Duration::hours(3), now - Duration::hours(1))
            .await
            .unwrap();
        store
            .mark_sent(&later.id, now, now + Duration::hours(2))
            .await
            .unwrap();

        let found = store.due_for_followup(now).await.unwrap();
        let ids: Vec<_> = found.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec![due.id.clone()]);
        assert_eq!(found[0].state, SessionState::Sent);
        assert!(!ids.contains(&pending.id));
    }

    pub async fn list_filters_and_paginates(store: &dyn OutreachStore) {
        let now = Utc::now();
        for i in 0..5 {
            store
                .insert_session_if_absent(session(
                    &format!("CA-list-{i}"),
                    &format!("+1555777000{i}"),
                    now + Duration::seconds(i),
                ))
                .await
                .unwrap();
        }
        let page = store
            .list_sessions(&SessionFilter {
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        let sids: Vec<_> = page.iter().map(|s| s.call_sid.as_str()).collect();
        assert_eq!(sids, vec!["CA-list-3", "CA-list-2"]);

        let by_phone = store
            .list_sessions(&SessionFilter {
                e164_contains: Some("7770004".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_phone.len(), 1);

        let sent_only = store
            .list_sessions(&SessionFilter {
                state: Some(SessionState::Sent),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(sent_only.is_empty());
    }

    pub async fn timeline_is_ordered(store: &dyn OutreachStore) {
        let now = Utc::now();
        let s = store
            .insert_session_if_absent(session("CA-tl", "+15551234567", now))
            .await
            .unwrap();
        for (i, (dir, body)) in [(Direction::Out, "hello"), (Direction::In, "hi back")]
            .into_iter()
            .enumerate()
        {
            store
                .append_message(OutreachMessage {
                    session_id: s.id.clone(),
                    direction: dir,
                    body: body.to_string(),
                    created_at: now + Duration::seconds(i as i64),
                })
                .await
                .unwrap();
        }
        store
            .append_reply_event(ReplyEvent {
                session_id: s.id.clone(),
                signal: ReplySignal::Note,
                created_at: now,
            })
            .await
            .unwrap();

        let msgs = store.messages_for(&s.id).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].body, "hello");
        assert_eq!(msgs[1].direction, Direction::In);
        let events = store.reply_events_for(&s.id).await.unwrap();
        assert_eq!(events[0].signal, ReplySignal::Note);
    }

    pub async fn contacts_upsert(store: &dyn OutreachStore) {
        let e164 = E164::parse("+15551234567").unwrap();
        assert!(store.get_contact(&e164).await.unwrap().is_none());
        store
            .upsert_contact(Contact {
                e164: e164.clone(),
                wa_capable: false,
                first_name: None,
            })
            .await
            .unwrap();
        store
            .upsert_contact(Contact {
                e164: e164.clone(),
                wa_capable: true,
                first_name: Some("Ada".to_string()),
            })
            .await
            .unwrap();
        let c = store.get_contact(&e164).await.unwrap().unwrap();
        assert!(c.wa_capable);
        assert_eq!(c.first_name.as_deref(), Some("Ada"));
    }
}
