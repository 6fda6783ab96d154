//! Append-only consent ledger.

use std::sync::Arc;

use tracing::info;

use crate::{
    clock::Clock,
    domain::{Channel, ConsentRecord, ConsentSnapshot, ConsentStatus, E164},
    store::OutreachStore,
    Result,
};

/// Where a consent change came from; persisted as the record's `source`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsentSource {
    InboundKeyword,
    Admin,
}

impl ConsentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentSource::InboundKeyword => "inbound_keyword",
            ConsentSource::Admin => "admin",
        }
    }
}

#[derive(Clone)]
pub struct ConsentLedger {
    store: Arc<dyn OutreachStore>,
    clock: Arc<dyn Clock>,
}

impl ConsentLedger {
    pub fn new(store: Arc<dyn OutreachStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append a record. Never updates or deletes earlier ones.
    pub async fn record_consent(
        &self,
        e164: &E164,
        channel: Channel,
        status: ConsentStatus,
        source: ConsentSource,
    ) -> Result<()> {
        self.store
            .append_consent(ConsentRecord {
                e164: e164.clone(),
                channel,
                status,
                source: source.as_str().to_string(),
                created_at: self.clock.now(),
            })
            .await?;
        info!(%e164, %channel, %status, source = source.as_str(), "consent recorded");
        Ok(())
    }

    pub async fn current_consent(&self, e164: &E164) -> Result<ConsentSnapshot> {
        Ok(ConsentSnapshot {
            sms: self.store.latest_consent(e164, Channel::Sms).await?,
            whatsapp: self.store.latest_consent(e164, Channel::WhatsApp).await?,
        })
    }
}
