use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    domain::{
        Channel, ConsentRecord, ConsentStatus, Contact, OutreachMessage, OutreachSession,
        ReplyEvent, SessionId, SessionState, E164,
    },
    store::{OutreachStore, SessionFilter},
    Result,
};

#[derive(Debug, Default)]
struct MemoryState {
    contacts: HashMap<E164, Contact>,
    consent: Vec<ConsentRecord>,
    /// Insertion order; `call_sid_index` points into this.
    sessions: Vec<OutreachSession>,
    call_sid_index: HashMap<String, usize>,
    messages: Vec<OutreachMessage>,
    reply_events: Vec<ReplyEvent>,
}

impl MemoryState {
    fn session_mut(&mut self, id: &SessionId) -> Option<&mut OutreachSession> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }
}

/// Single-process store backed by a lock-protected in-memory state.
///
/// Used by tests and for running without a database file.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(sessions: &mut [OutreachSession]) {
    // Stable sort keeps later inserts ahead on equal timestamps after the reverse.
    sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    sessions.reverse();
}

#[async_trait]
impl OutreachStore for InMemoryStore {
    async fn get_contact(&self, e164: &E164) -> Result<Option<Contact>> {
        Ok(self.state.read().await.contacts.get(e164).cloned())
    }

    async fn upsert_contact(&self, contact: Contact) -> Result<()> {
        let mut st = self.state.write().await;
        st.contacts.insert(contact.e164.clone(), contact);
        Ok(())
    }

    async fn append_consent(&self, record: ConsentRecord) -> Result<()> {
        self.state.write().await.consent.push(record);
        Ok(())
    }

    async fn latest_consent(
        &self,
        e164: &E164,
        channel: Channel,
    ) -> Result<Option<ConsentStatus>> {
        let st = self.state.read().await;
        // `max_by_key` returns the last maximum, so equal timestamps resolve to the later append.
        Ok(st
            .consent
            .iter()
            .filter(|r| &r.e164 == e164 && r.channel == channel)
            .max_by_key(|r| r.created_at)
            .map(|r| r.status))
    }

    async fn insert_session_if_absent(&self, session: OutreachSession) -> Result<OutreachSession> {
        let mut st = self.state.write().await;
        if let Some(idx) = st.call_sid_index.get(&session.call_sid).copied() {
            return Ok(st.sessions[idx].clone());
        }
        let idx = st.sessions.len();
        st.call_sid_index.insert(session.call_sid.clone(), idx);
        st.sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<OutreachSession>> {
        let st = self.state.read().await;
        Ok(st.sessions.iter().find(|s| &s.id == id).cloned())
    }

    async fn latest_open_session_since(
        &self,
        e164: &E164,
        since: DateTime<Utc>,
    ) -> Result<Option<OutreachSession>> {
        let st = self.state.read().await;
        let mut matches: Vec<_> = st
            .sessions
            .iter()
            .filter(|s| &s.e164 == e164 && s.state.is_open() && s.created_at > since)
            .cloned()
            .collect();
        newest_first(&mut matches);
        Ok(matches.into_iter().next())
    }

    async fn mark_sent(
        &self,
        id: &SessionId,
        sent_at: DateTime<Utc>,
        followup_due_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut st = self.state.write().await;
        let Some(s) = st.session_mut(id) else {
            return Ok(false);
        };
        if s.state != SessionState::Pending {
            return Ok(false);
        }
        s.state = SessionState::Sent;
        s.last_sent_at = Some(sent_at);
        s.followup_due_at = Some(followup_due_at);
        Ok(true)
    }

    async fn transition(
        &self,
        id: &SessionId,
        from: &[SessionState],
        to: SessionState,
    ) -> Result<bool> {
        let mut st = self.state.write().await;
        let Some(s) = st.session_mut(id) else {
            return Ok(false);
        };
        if !from.contains(&s.state) {
            return Ok(false);
        }
        s.state = to;
        Ok(true)
    }

    async fn due_for_followup(&self, now: DateTime<Utc>) -> Result<Vec<OutreachSession>> {
        let st = self.state.read().await;
        let mut due: Vec<_> = st
            .sessions
            .iter()
            .filter(|s| {
                s.state == SessionState::Sent && s.followup_due_at.is_some_and(|due| due <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.followup_due_at);
        Ok(due)
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<OutreachSession>> {
        let st = self.state.read().await;
        let mut out: Vec<_> = st
            .sessions
            .iter()
            .filter(|s| filter.state.map_or(true, |want| s.state == want))
            .filter(|s| {
                filter
                    .e164_contains
                    .as_deref()
                    .map_or(true, |needle| s.e164.as_str().contains(needle))
            })
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn append_message(&self, message: OutreachMessage) -> Result<()> {
        self.state.write().await.messages.push(message);
        Ok(())
    }

    async fn messages_for(&self, session_id: &SessionId) -> Result<Vec<OutreachMessage>> {
        let st = self.state.read().await;
        let mut out: Vec<_> = st
            .messages
            .iter()
            .filter(|m| &m.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }

    async fn append_reply_event(&self, event: ReplyEvent) -> Result<()> {
        self.state.write().await.reply_events.push(event);
        Ok(())
    }

    async fn reply_events_for(&self, session_id: &SessionId) -> Result<Vec<ReplyEvent>> {
        let st = self.state.read().await;
        let mut out: Vec<_> = st
            .reply_events
            .iter()
            .filter(|e| &e.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.created_at);
        Ok(out)
    }
}
