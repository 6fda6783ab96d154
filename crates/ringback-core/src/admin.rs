//! Admin operations over sessions and consent.
//!
//! Thin delegation to the engine and store; the HTTP layer only parses
//! requests and renders these results.

use serde::Serialize;
use tracing::info;

use crate::{
    consent::ConsentSource,
    domain::{
        Channel, ConsentSnapshot, ConsentStatus, OutreachMessage, OutreachSession, ReplyEvent,
        SessionId, SessionState, E164,
    },
    engine::OutreachEngine,
    store::SessionFilter,
    Result,
};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// Raw list query as received; validated by `AdminService::list_sessions`.
#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub state: Option<String>,
    pub e164: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub items: Vec<OutreachSession>,
    /// Offset of the next page, absent on the last page.
    pub next_offset: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session: OutreachSession,
    pub messages: Vec<OutreachMessage>,
    pub reply_events: Vec<ReplyEvent>,
    pub consent: ConsentSnapshot,
}

#[derive(Clone)]
pub struct AdminService {
    engine: OutreachEngine,
}

impl AdminService {
    pub fn new(engine: OutreachEngine) -> Self {
        Self { engine }
    }

    pub async fn list_sessions(&self, query: ListQuery) -> Result<SessionPage> {
        let state = query
            .state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<SessionState>)
            .transpose()?;
        let e164_contains = query
            .e164
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.unwrap_or(0);

        // One extra row tells us whether another page exists.
        let mut items = self
            .engine
            .store()
            .list_sessions(&SessionFilter {
                state,
                e164_contains,
                limit: limit + 1,
                offset,
            })
            .await?;
        let next_offset = if items.len() > limit {
            items.truncate(limit);
            Some(offset + limit)
        } else {
            None
        };
        Ok(SessionPage { items, next_offset })
    }

    pub async fn session_detail(&self, id: &SessionId) -> Result<SessionDetail> {
        let session = self.engine.sessions().require(id).await?;
        let store = self.engine.store();
        let messages = store.messages_for(id).await?;
        let reply_events = store.reply_events_for(id).await?;
        let consent = self.engine.consent().current_consent(&session.e164).await?;
        Ok(SessionDetail {
            session,
            messages,
            reply_events,
            consent,
        })
    }

    pub async fn resend(&self, id: &SessionId) -> Result<OutreachSession> {
        let session = self.engine.resend_initial(id).await?;
        info!(session_id = %id, "admin resend");
        Ok(session)
    }

    /// Stop an open session. Cancelling a session that is already terminal is
    /// a no-op; a missing session is `NotFound`.
    pub async fn cancel(&self, id: &SessionId) -> Result<bool> {
        self.engine.sessions().require(id).await?;
        let changed = self.engine.sessions().mark_stopped(id).await?;
        info!(session_id = %id, changed, "admin cancel");
        Ok(changed)
    }

    pub async fn set_consent(&self, e164: &str, channel: &str, action: &str) -> Result<()> {
        let e164 = E164::parse(e164)?;
        let channel: Channel = channel.trim().parse()?;
        let status: ConsentStatus = action.trim().parse()?;
        self.engine
            .apply_opt_status(&e164, channel, status, ConsentSource::Admin)
            .await
    }
}
