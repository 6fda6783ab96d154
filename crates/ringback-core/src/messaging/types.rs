use serde::{Deserialize, Serialize};

/// Provider acknowledgement for an accepted outbound message or call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_id: String,
}

/// Quick-reply button offered in a WhatsApp options message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionButton {
    /// Reply payload the provider sends back when tapped (`"1"`, `"2"`, ...).
    pub id: String,
    pub label: String,
}

/// WhatsApp payload: free text, or a body plus quick-reply buttons.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhatsAppMessage {
    Text(String),
    Options {
        body: String,
        buttons: Vec<OptionButton>,
    },
}

impl WhatsAppMessage {
    /// Text rendering for providers/transports without interactive support.
    pub fn fallback_text(&self) -> String {
        match self {
            WhatsAppMessage::Text(t) => t.clone(),
            WhatsAppMessage::Options { body, buttons } => {
                let mut out = body.clone();
                for b in buttons {
                    out.push_str(&format!("\n{}. {}", b.id, b.label));
                }
                out
            }
        }
    }
}

/// Channel-neutral outbound message composed by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Options {
        /// WhatsApp body shown above the buttons.
        body: String,
        buttons: Vec<OptionButton>,
        /// Full SMS rendering (numbered prompt + opt-out instruction).
        sms_text: String,
    },
}

impl OutboundMessage {
    pub fn plain_text(&self) -> String {
        match self {
            OutboundMessage::Text(t) => t.clone(),
            OutboundMessage::Options { sms_text, .. } => sms_text.clone(),
        }
    }

    pub fn into_whatsapp(self) -> WhatsAppMessage {
        match self {
            OutboundMessage::Text(t) => WhatsAppMessage::Text(t),
            OutboundMessage::Options { body, buttons, .. } => {
                WhatsAppMessage::Options { body, buttons }
            }
        }
    }

    /// Body as it should appear in the message log for the given channel.
    pub fn log_body(&self, channel: crate::domain::Channel) -> String {
        match channel {
            crate::domain::Channel::Sms => self.plain_text(),
            crate::domain::Channel::WhatsApp => self.clone().into_whatsapp().fallback_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fallback_lists_buttons_in_order() {
        let msg = WhatsAppMessage::Options {
            body: "How can we help?".to_string(),
            buttons: vec![
                OptionButton {
                    id: "1".to_string(),
                    label: "Call now".to_string(),
                },
                OptionButton {
                    id: "2".to_string(),
                    label: "Book time".to_string(),
                },
            ],
        };
        assert_eq!(
            msg.fallback_text(),
            "How can we help?\n1. Call now\n2. Book time"
        );
    }
}
