//! Configuration, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::matcher::KeywordMatcher;

/// Mailbox endpoints and credentials.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub poll_interval_secs: u64,
    pub allowed_senders: Vec<String>,
}

impl MailboxConfig {
    /// Build config from environment variables.
    /// Returns `None` if `MAIL_IMAP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("MAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("MAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            std::env::var("MAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = std::env::var("MAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("MAIL_USERNAME").unwrap_or_default();
        let password = std::env::var("MAIL_PASSWORD").unwrap_or_default();
        let from_address = std::env::var("MAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        let poll_interval_secs: u64 = std::env::var("MAIL_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let allowed_senders: Vec<String> = std::env::var("MAIL_ALLOWED_SENDERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            poll_interval_secs,
            allowed_senders,
        })
    }
}

/// Reply drafter backend configuration.
#[derive(Debug, Clone)]
pub struct DrafterConfig {
    pub api_key: SecretString,
    pub model: String,
}

impl DrafterConfig {
    /// Returns `None` if `GEMINI_API_KEY` is not set (drafting disabled).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").ok()?;
        let model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string());
        Some(Self {
            api_key: SecretString::from(api_key),
            model,
        })
    }
}

/// Top-level listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub mailbox: MailboxConfig,
    /// JSON catalog file, re-read per matching pass.
    pub catalog_path: PathBuf,
    /// Minimum delay between successive item extractions.
    pub throttle: Duration,
    /// Edit distance bound for fuzzy keyword matches.
    pub max_distance: usize,
    pub drafter: Option<DrafterConfig>,
    /// Whether catalog hits also trigger a drafted SMTP reply.
    pub auto_reply: bool,
}

impl ListenerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mailbox = MailboxConfig::from_env()
            .ok_or_else(|| ConfigError::MissingEnvVar("MAIL_IMAP_HOST".into()))?;

        let catalog_path = std::env::var("CATALOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./catalog.json"));

        let throttle_ms = parse_or_default("ITEM_THROTTLE_MS", 1000)?;
        let max_distance = parse_or_default(
            "MATCH_MAX_DISTANCE",
            KeywordMatcher::DEFAULT_MAX_DISTANCE as u64,
        )? as usize;

        let auto_reply = std::env::var("AUTO_REPLY")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            mailbox,
            catalog_path,
            throttle: Duration::from_millis(throttle_ms),
            max_distance,
            drafter: DrafterConfig::from_env(),
            auto_reply,
        })
    }
}

/// Parse an optional numeric env var, erroring on malformed values instead
/// of silently falling back.
fn parse_or_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a non-negative integer, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}
