use std::{fmt, str::FromStr, sync::OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Phone number in E.164 form (`+` followed by 7..15 digits).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct E164(String);

fn e164_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{6,14}$").expect("valid regex"))
}

impl E164 {
    /// Parse a phone number, tolerating surrounding whitespace and common
    /// separators (`-`, `.`, `(`, `)`, spaces).
    pub fn parse(raw: &str) -> Result<Self> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();
        if !e164_re().is_match(&cleaned) {
            return Err(Error::Validation(format!("not an E.164 number: {raw}")));
        }
        Ok(Self(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for E164 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for E164 {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<E164> for String {
    fn from(value: E164) -> Self {
        value.0
    }
}

/// Outreach session id (uuid v4, string form).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declares a string-backed enum with `as_str`, `FromStr` and `Display`.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Validation(format!(
                        concat!("invalid ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(
    /// Outbound channel, chosen once per session.
    Channel {
        Sms => "sms",
        WhatsApp => "whatsapp",
    }
);

str_enum!(ConsentStatus {
    OptIn => "opt_in",
    OptOut => "opt_out",
});

str_enum!(
    /// Session lifecycle. `Responded`, `Expired` and `Stopped` are terminal for
    /// automated transitions.
    SessionState {
        Pending => "pending",
        Sent => "sent",
        Responded => "responded",
        Expired => "expired",
        Stopped => "stopped",
    }
);

str_enum!(Direction {
    In => "in",
    Out => "out",
});

str_enum!(ReplySignal {
    CallRequest => "call_request",
    BookingRequest => "booking_request",
    Note => "note",
});

impl SessionState {
    /// States that block a new initial message and that inbound replies attach to.
    pub fn is_open(self) -> bool {
        matches!(self, SessionState::Pending | SessionState::Sent)
    }
}

/// Read-mostly reference data about a caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub e164: E164,
    pub wa_capable: bool,
    pub first_name: Option<String>,
}

/// Append-only consent fact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub e164: E164,
    pub channel: Channel,
    pub status: ConsentStatus,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Current consent per channel; `None` means no record (treated as not opted out).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentSnapshot {
    pub sms: Option<ConsentStatus>,
    pub whatsapp: Option<ConsentStatus>,
}

impl ConsentSnapshot {
    pub fn for_channel(&self, channel: Channel) -> Option<ConsentStatus> {
        match channel {
            Channel::Sms => self.sms,
            Channel::WhatsApp => self.whatsapp,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutreachSession {
    pub id: SessionId,
    pub call_sid: String,
    pub e164: E164,
    pub channel: Channel,
    pub state: SessionState,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub followup_due_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutreachMessage {
    pub session_id: SessionId,
    pub direction: Direction,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEvent {
    pub session_id: SessionId,
    pub signal: ReplySignal,
    pub created_at: DateTime<Utc>,
}
