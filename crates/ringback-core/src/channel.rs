//! Per-contact channel selection.

use std::sync::Arc;

use crate::{
    consent::ConsentLedger,
    domain::{Channel, ConsentStatus, E164},
    store::OutreachStore,
    Result,
};

#[derive(Clone)]
pub struct ChannelSelector {
    store: Arc<dyn OutreachStore>,
    consent: ConsentLedger,
}

impl ChannelSelector {
    pub fn new(store: Arc<dyn OutreachStore>, consent: ConsentLedger) -> Self {
        Self { store, consent }
    }

    /// WhatsApp when the contact is WhatsApp-capable and has not opted out of
    /// WhatsApp; SMS otherwise. Unknown contacts are not WhatsApp-capable.
    ///
    /// SMS consent is deliberately not consulted on the fallback path.
    pub async fn choose_channel(&self, e164: &E164) -> Result<Channel> {
        let wa_capable = self
            .store
            .get_contact(e164)
            .await?
            .is_some_and(|c| c.wa_capable);
        if !wa_capable {
            return Ok(Channel::Sms);
        }

        let consent = self.consent.current_consent(e164).await?;
        if consent.whatsapp == Some(ConsentStatus::OptOut) {
            return Ok(Channel::Sms);
        }
        Ok(Channel::WhatsApp)
    }
}
