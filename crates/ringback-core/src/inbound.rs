//! Inbound message handling: opt-out/opt-in keywords and reply attribution.

use tracing::info;

use crate::{
    consent::ConsentSource,
    domain::{Channel, ConsentStatus, ReplySignal, SessionId, E164},
    engine::OutreachEngine,
    Result,
};

const WHATSAPP_PREFIX: &str = "whatsapp:";

const STOP_KEYWORDS: &[&str] = &["stop", "stopall", "unsubscribe", "cancel", "end", "quit"];
const START_KEYWORDS: &[&str] = &["start", "yes", "unstop"];

const CALL_WORDS: &[&str] = &["1", "call", "call now", "call me", "call back"];
const BOOK_WORDS: &[&str] = &["2", "book", "book time", "booking", "schedule"];
const NOTE_WORDS: &[&str] = &["3", "note", "leave note", "leave a note"];

/// Provider-neutral inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender address as delivered, e.g. `+15551234567` or `whatsapp:+15551234567`.
    pub from: String,
    pub body: String,
    /// Quick-reply payload when the sender tapped a WhatsApp button.
    pub button_payload: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    OptedOut { e164: E164, channel: Channel },
    OptedIn { e164: E164, channel: Channel },
    /// No open session within the reply window.
    NoSession,
    Replied {
        session_id: SessionId,
        signal: ReplySignal,
    },
}

/// Split a sender address into number and channel (`whatsapp:` prefix means WhatsApp).
pub fn parse_sender(raw: &str) -> Result<(E164, Channel)> {
    let raw = raw.trim();
    let (number, channel) = match raw.get(..WHATSAPP_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(WHATSAPP_PREFIX) => {
            (&raw[WHATSAPP_PREFIX.len()..], Channel::WhatsApp)
        }
        _ => (raw, Channel::Sms),
    };
    Ok((E164::parse(number)?, channel))
}

/// `Some(status)` when the whole body is a STOP-family or START-family keyword.
pub fn opt_keyword(body: &str) -> Option<ConsentStatus> {
    let word = body.trim().to_lowercase();
    if STOP_KEYWORDS.contains(&word.as_str()) {
        Some(ConsentStatus::OptOut)
    } else if START_KEYWORDS.contains(&word.as_str()) {
        Some(ConsentStatus::OptIn)
    } else {
        None
    }
}

/// Coarse reply classification: `"1"` for call requests, `"2"` for booking,
/// `"3"` for an explicit note choice. Anything else passes through unchanged.
pub fn classify_reply(text: &str) -> &str {
    let normalized = text.trim().to_lowercase();
    let normalized = normalized.trim_end_matches(['.', '!']);
    if CALL_WORDS.contains(&normalized) {
        "1"
    } else if BOOK_WORDS.contains(&normalized) {
        "2"
    } else if NOTE_WORDS.contains(&normalized) {
        "3"
    } else {
        text.trim()
    }
}

#[derive(Clone)]
pub struct InboundProcessor {
    engine: OutreachEngine,
}

impl InboundProcessor {
    pub fn new(engine: OutreachEngine) -> Self {
        Self { engine }
    }

    /// Keywords are handled first and never touch sessions. Other messages are
    /// attributed to the newest open session within the reply window.
    pub async fn process(&self, message: InboundMessage) -> Result<InboundOutcome> {
        let (e164, channel) = parse_sender(&message.from)?;

        if let Some(status) = opt_keyword(&message.body) {
            self.engine
                .apply_opt_status(&e164, channel, status, ConsentSource::InboundKeyword)
                .await?;
            return Ok(match status {
                ConsentStatus::OptOut => InboundOutcome::OptedOut { e164, channel },
                ConsentStatus::OptIn => InboundOutcome::OptedIn { e164, channel },
            });
        }

        let Some(session) = self.engine.sessions().find_reply_target(&e164).await? else {
            info!(%e164, %channel, "inbound message with no open session");
            return Ok(InboundOutcome::NoSession);
        };

        let text = message
            .button_payload
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&message.body);
        let input = classify_reply(text);
        let signal = self.engine.handle_reply(&session, input).await?;
        Ok(InboundOutcome::Replied {
            session_id: session.id,
            signal,
        })
    }
}
