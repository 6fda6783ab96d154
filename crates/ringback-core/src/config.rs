use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{
    domain::E164,
    engine::EngineSettings,
    errors::Error,
    session::SessionTimings,
    Result,
};

/// Twilio account settings shared by the messaging and telephony adapters.
#[derive(Clone, Debug)]
pub struct TwilioSettings {
    pub account_sid: String,
    pub auth_token: String,
    pub sms_from: E164,
    pub whatsapp_from: E164,
    pub whatsapp_options_content_sid: Option<String>,
}

/// Typed configuration, read from the environment (and `.env` when present).
#[derive(Clone, Debug)]
pub struct Config {
    // Server
    pub bind_addr: String,
    pub public_base_url: Option<String>,
    pub database_path: PathBuf,

    // Provider
    pub twilio: TwilioSettings,
    pub webhook_signature_verify: bool,

    // Business copy + routing
    pub engine: EngineSettings,

    // Rules
    pub missed_call_min_duration: Duration,
    pub timings: SessionTimings,

    // Admin / sweep
    pub admin_api_token: Option<String>,
    pub followup_sweep_interval: Option<Duration>,
    pub sweep_rate_limit_requests: u32,
    pub sweep_rate_limit_window: Duration,

    // Outbound throttling
    pub outbound_min_interval: Option<Duration>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in `load`).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(&get);

        let bind_addr = vars
            .str("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let public_base_url = vars
            .str("PUBLIC_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string());
        let database_path =
            PathBuf::from(vars.str("DATABASE_PATH").unwrap_or("./ringback.db".to_string()));

        let webhook_signature_verify = vars.bool("WEBHOOK_SIGNATURE_VERIFY").unwrap_or(true);
        if webhook_signature_verify && public_base_url.is_none() {
            return Err(Error::Config(
                "PUBLIC_BASE_URL is required when WEBHOOK_SIGNATURE_VERIFY is enabled".to_string(),
            ));
        }

        // Provider credentials
        let account_sid = vars.required("TWILIO_ACCOUNT_SID")?;
        let auth_token = vars.required("TWILIO_AUTH_TOKEN")?;
        let sms_from = vars.e164("TWILIO_SMS_FROM")?;
        let whatsapp_from = match vars.str("TWILIO_WHATSAPP_FROM") {
            Some(raw) => parse_e164_var("TWILIO_WHATSAPP_FROM", &raw)?,
            None => sms_from.clone(),
        };
        let whatsapp_options_content_sid = vars.str("TWILIO_WHATSAPP_OPTIONS_CONTENT_SID");

        // Business
        let engine = EngineSettings {
            business_name: vars
                .str("BUSINESS_NAME")
                .unwrap_or_else(|| "our team".to_string()),
            business_number: vars.e164("BUSINESS_NUMBER")?,
            booking_url: vars.required("BOOKING_URL")?,
        };

        // Rules (defaults: 45s, 24h dedup, 2h follow-up, 48h reply window)
        let missed_call_min_duration =
            Duration::from_secs(vars.u64("MISSED_CALL_MIN_DURATION_SECS").unwrap_or(45));
        let timings = SessionTimings {
            dedup_window: chrono::Duration::hours(vars.i64("DEDUP_WINDOW_HOURS").unwrap_or(24)),
            followup_delay: chrono::Duration::minutes(
                vars.i64("FOLLOWUP_DELAY_MINUTES").unwrap_or(120),
            ),
            reply_window: chrono::Duration::hours(vars.i64("REPLY_WINDOW_HOURS").unwrap_or(48)),
        };

        let admin_api_token = vars.str("ADMIN_API_TOKEN");
        let followup_sweep_interval = vars
            .u64("FOLLOWUP_SWEEP_INTERVAL_SECS")
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        let sweep_rate_limit_requests = vars.u32("SWEEP_RATE_LIMIT_REQUESTS").unwrap_or(5);
        let sweep_rate_limit_window =
            Duration::from_secs(vars.u64("SWEEP_RATE_LIMIT_WINDOW_SECS").unwrap_or(60));

        let outbound_min_interval = vars
            .u64("OUTBOUND_MIN_INTERVAL_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Self {
            bind_addr,
            public_base_url,
            database_path,
            twilio: TwilioSettings {
                account_sid,
                auth_token,
                sms_from,
                whatsapp_from,
                whatsapp_options_content_sid,
            },
            webhook_signature_verify,
            engine,
            missed_call_min_duration,
            timings,
            admin_api_token,
            followup_sweep_interval,
            sweep_rate_limit_requests,
            sweep_rate_limit_window,
            outbound_min_interval,
        })
    }
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    /// Trimmed, non-empty value.
    fn str(&self, key: &str) -> Option<String> {
        (self.0)(key).and_then(non_empty)
    }

    fn required(&self, key: &str) -> Result<String> {
        self.str(key)
            .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
    }

    fn e164(&self, key: &str) -> Result<E164> {
        parse_e164_var(key, &self.required(key)?)
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.str(key).map(|s| {
            matches!(
                s.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn u64(&self, key: &str) -> Option<u64> {
        self.str(key).and_then(|s| s.parse::<u64>().ok())
    }

    fn u32(&self, key: &str) -> Option<u32> {
        self.str(key).and_then(|s| s.parse::<u32>().ok())
    }

    fn i64(&self, key: &str) -> Option<i64> {
        self.str(key)
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|v| *v >= 0)
    }
}

fn parse_e164_var(key: &str, raw: &str) -> Result<E164> {
    E164::parse(raw).map_err(|_| Error::Config(format!("{key} must be an E.164 number: {raw}")))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}
