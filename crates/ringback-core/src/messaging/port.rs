use async_trait::async_trait;

use crate::{
    domain::{Channel, E164},
    messaging::types::{OutboundMessage, SendReceipt, WhatsAppMessage},
    Result,
};

/// Hexagonal port for the messaging provider.
///
/// Twilio is the first implementation; anything that can deliver SMS and a
/// lightweight WhatsApp "options" message fits behind it.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_sms(&self, to: &E164, text: &str) -> Result<SendReceipt>;

    async fn send_whatsapp(&self, to: &E164, message: WhatsAppMessage) -> Result<SendReceipt>;
}

/// Deliver `message` over `channel`.
///
/// SMS has no native options shape, so options are flattened to text.
pub async fn send_on_channel(
    gateway: &dyn MessagingGateway,
    channel: Channel,
    to: &E164,
    message: OutboundMessage,
) -> Result<SendReceipt> {
    match channel {
        Channel::Sms => gateway.send_sms(to, &message.plain_text()).await,
        Channel::WhatsApp => gateway.send_whatsapp(to, message.into_whatsapp()).await,
    }
}
