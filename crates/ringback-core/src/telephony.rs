use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{domain::E164, Result};

/// What the provider should do once the outbound leg is answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallInstructions {
    /// Inline TwiML document.
    Twiml(String),
    /// URL the provider fetches instructions from.
    Url(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHandle {
    pub call_sid: String,
}

/// Hexagonal port for placing outbound calls (used only for "call now" replies).
#[async_trait]
pub trait TelephonyGateway: Send + Sync {
    async fn start_outbound(&self, to: &E164, instructions: CallInstructions)
        -> Result<CallHandle>;
}

/// TwiML that bridges the answered leg to `target`, ringing back only once the
/// target answers.
pub fn bridge_twiml(target: &E164) -> String {
    format!(
        "<Response><Dial answerOnBridge=\"true\"><Number>{}</Number></Dial></Response>",
        target.as_str()
    )
}
