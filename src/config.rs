//! Configuration types.
//!
//! Everything is read from the environment once, in `AppConfig::from_env()`,
//! and handed to collaborators at construction.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default number of candidate messages fetched per reply scan.
pub const DEFAULT_SCAN_MAX_RESULTS: u32 = 50;

/// Default Gmail REST endpoint for the authenticated user.
pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Which mail transport backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Gmail,
    /// In-process mailbox, nothing leaves the machine.
    Memory,
}

/// Gmail API access.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub api_base: String,
    /// Authorized-user token file (client id/secret + refresh token).
    pub token_path: PathBuf,
    /// Pre-issued access token; bypasses the token file when set.
    pub access_token: Option<SecretString>,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GMAIL_API_BASE.to_string(),
            token_path: default_token_path(),
            access_token: None,
        }
    }
}

/// Reply scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Address the campaigns are sent from. Excluded from reply searches.
    pub owner_address: String,
    /// Result cap per mailbox search.
    pub max_results: u32,
}

/// Content generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// LLM temperature for campaign copy and reply drafts.
    pub temperature: f32,
    /// Max tokens for campaign copy.
    pub max_tokens: u32,
    /// Max tokens for reply drafts.
    pub reply_max_tokens: u32,
    /// Advisory word limit for reply drafts.
    pub reply_word_limit: u32,
    /// Name used to sign generated emails.
    pub signature_name: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            reply_max_tokens: 300,
            reply_word_limit: 150,
            signature_name: None,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub transport: TransportKind,
    pub llm: LlmConfig,
    pub gmail: GmailConfig,
    pub scan: ScanConfig,
    pub generator: GeneratorConfig,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let sender = std::env::var("CAMPAIGN_MAILER_SENDER")
            .map_err(|_| ConfigError::MissingEnvVar("CAMPAIGN_MAILER_SENDER".into()))?;
        if !sender.contains('@') {
            return Err(ConfigError::InvalidValue {
                key: "CAMPAIGN_MAILER_SENDER".into(),
                message: format!("'{sender}' is not an email address"),
            });
        }

        let backend = match std::env::var("CAMPAIGN_MAILER_LLM_BACKEND")
            .unwrap_or_else(|_| "openai".to_string())
            .to_lowercase()
            .as_str()
        {
            "openai" => LlmBackend::OpenAi,
            "anthropic" => LlmBackend::Anthropic,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "CAMPAIGN_MAILER_LLM_BACKEND".into(),
                    message: format!("unknown backend '{other}' (expected openai or anthropic)"),
                });
            }
        };

        let (key_var, default_model) = match backend {
            LlmBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o-mini"),
            LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-3-5-haiku-latest"),
        };
        let api_key = std::env::var(key_var).map_err(|_| ConfigError::MissingRequired {
            key: key_var.into(),
            hint: format!("export {key_var}=... (never commit API keys)"),
        })?;
        let model =
            std::env::var("CAMPAIGN_MAILER_MODEL").unwrap_or_else(|_| default_model.to_string());

        let port = parse_env("CAMPAIGN_MAILER_PORT", 8080u16)?;
        let max_results = parse_env("CAMPAIGN_MAILER_SCAN_MAX_RESULTS", DEFAULT_SCAN_MAX_RESULTS)?;

        let transport = match std::env::var("CAMPAIGN_MAILER_TRANSPORT")
            .unwrap_or_else(|_| "gmail".to_string())
            .to_lowercase()
            .as_str()
        {
            "gmail" => TransportKind::Gmail,
            "memory" => TransportKind::Memory,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "CAMPAIGN_MAILER_TRANSPORT".into(),
                    message: format!("unknown transport '{other}' (expected gmail or memory)"),
                });
            }
        };

        let gmail = GmailConfig {
            api_base: std::env::var("GMAIL_API_BASE")
                .unwrap_or_else(|_| DEFAULT_GMAIL_API_BASE.to_string()),
            token_path: std::env::var("GMAIL_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_token_path()),
            access_token: std::env::var("GMAIL_ACCESS_TOKEN")
                .ok()
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
        };

        let generator = GeneratorConfig {
            signature_name: std::env::var("CAMPAIGN_MAILER_SIGNATURE")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            ..GeneratorConfig::default()
        };

        Ok(Self {
            port,
            db_path: std::env::var("CAMPAIGN_MAILER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/campaign-mailer.db")),
            log_dir: std::env::var("CAMPAIGN_MAILER_LOG_DIR").ok().map(PathBuf::from),
            transport,
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            gmail,
            scan: ScanConfig {
                owner_address: sender.trim().to_lowercase(),
                max_results,
            },
            generator,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".gmail_autogen").join("token.json")
}
