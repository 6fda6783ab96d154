//! Twilio adapter: Programmable Messaging (SMS + WhatsApp) and Voice.
//!
//! Both gateways share one REST client using form-encoded POSTs with basic auth.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use ringback_core::{
    config::TwilioSettings,
    domain::E164,
    errors::Error,
    messaging::{
        port::MessagingGateway,
        types::{SendReceipt, WhatsAppMessage},
    },
    telephony::{CallHandle, CallInstructions, TelephonyGateway},
    Result,
};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct CreatedResource {
    sid: String,
}

#[derive(Clone, Debug)]
pub struct TwilioClient {
    http: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioClient {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Gateway(format!("twilio client build error: {e}")))?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        })
    }

    /// Point at a different API host (tests, regional edges).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{resource}.json",
            self.base_url, self.account_sid
        )
    }

    /// Create a resource. A 429 is retried once after `Retry-After` (capped);
    /// everything else is reported as a gateway error.
    async fn create(&self, resource: &str, form: &[(&str, String)]) -> Result<String> {
        let url = self.resource_url(resource);
        let mut retried = false;

        loop {
            let resp = self
                .http
                .post(&url)
                .basic_auth(&self.account_sid, Some(&self.auth_token))
                .form(form)
                .send()
                .await
                .map_err(|e| Error::Gateway(format!("twilio request error: {e}")))?;

            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS && !retried {
                let wait = retry_after(resp.headers()).min(MAX_RETRY_AFTER);
                warn!(resource, wait_ms = wait.as_millis() as u64, "twilio rate limited; retrying once");
                tokio::time::sleep(wait).await;
                retried = true;
                continue;
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::Gateway(format!(
                    "twilio {resource} failed: {status} {}",
                    body.chars().take(200).collect::<String>()
                )));
            }

            let created: CreatedResource = resp
                .json()
                .await
                .map_err(|e| Error::Gateway(format!("twilio json error: {e}")))?;
            debug!(resource, sid = %created.sid, "twilio resource created");
            return Ok(created.sid);
        }
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(1))
}

fn whatsapp_address(n: &E164) -> String {
    format!("whatsapp:{n}")
}

#[derive(Clone, Debug)]
pub struct TwilioMessenger {
    client: TwilioClient,
    sms_from: E164,
    whatsapp_from: E164,
    /// Content template with quick-reply buttons; without it options are sent as text.
    options_content_sid: Option<String>,
}

impl TwilioMessenger {
    pub fn new(client: TwilioClient, settings: &TwilioSettings) -> Self {
        Self {
            client,
            sms_from: settings.sms_from.clone(),
            whatsapp_from: settings.whatsapp_from.clone(),
            options_content_sid: settings.whatsapp_options_content_sid.clone(),
        }
    }
}

#[async_trait]
impl MessagingGateway for TwilioMessenger {
    async fn send_sms(&self, to: &E164, text: &str) -> Result<SendReceipt> {
        let form = [
            ("To", to.to_string()),
            ("From", self.sms_from.to_string()),
            ("Body", text.to_string()),
        ];
        let provider_id = self.client.create("Messages", &form).await?;
        Ok(SendReceipt { provider_id })
    }

    async fn send_whatsapp(&self, to: &E164, message: WhatsAppMessage) -> Result<SendReceipt> {
        let mut form = vec![
            ("To", whatsapp_address(to)),
            ("From", whatsapp_address(&self.whatsapp_from)),
        ];
        match (&message, &self.options_content_sid) {
            (WhatsAppMessage::Options { body, .. }, Some(content_sid)) => {
                form.push(("ContentSid", content_sid.clone()));
                form.push((
                    "ContentVariables",
                    serde_json::json!({ "1": body }).to_string(),
                ));
            }
            _ => form.push(("Body", message.fallback_text())),
        }
        let provider_id = self.client.create("Messages", &form).await?;
        Ok(SendReceipt { provider_id })
    }
}

#[derive(Clone, Debug)]
pub struct TwilioTelephony {
    client: TwilioClient,
    /// Caller id presented on outbound legs.
    from: E164,
}

impl TwilioTelephony {
    pub fn new(client: TwilioClient, from: E164) -> Self {
        Self { client, from }
    }
}

#[async_trait]
impl TelephonyGateway for TwilioTelephony {
    async fn start_outbound(
        &self,
        to: &E164,
        instructions: CallInstructions,
    ) -> Result<CallHandle> {
        let mut form = vec![("To", to.to_string()), ("From", self.from.to_string())];
        match instructions {
            CallInstructions::Twiml(twiml) => form.push(("Twiml", twiml)),
            CallInstructions::Url(url) => form.push(("Url", url)),
        }
        let call_sid = self.client.create("Calls", &form).await?;
        Ok(CallHandle { call_sid })
    }
}
