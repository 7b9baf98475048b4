//! Error types for the campaign mailer.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Campaign error: {0}")]
    Campaign(#[from] CampaignError),
}

impl Error {
    /// Short category name, reported alongside failed reply outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Database(_) => "DatabaseError",
            Error::Transport(_) => "TransportError",
            Error::Llm(_) => "LlmError",
            Error::Campaign(_) => "CampaignError",
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mail transport errors (mailbox search/fetch and send).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Mailbox request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Mailbox API returned {status} for {operation}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Malformed mailbox response for {operation}: {reason}")]
    Malformed { operation: String, reason: String },

    #[error("Failed to build message: {0}")]
    Compose(String),

    #[error("Send to {to} failed: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("Message {0} not found")]
    NotFound(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Campaign workflow errors.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("Campaign {0} not found")]
    NotFound(Uuid),

    #[error("Recipient {0} not found")]
    RecipientNotFound(Uuid),

    #[error("Campaign {0} has no generated email yet")]
    NotGenerated(Uuid),

    #[error("Invalid input: {0}")]
    Validation(String),
}

/// Result type alias for the campaign mailer.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_the_category() {
        let err: Error = TransportError::SendFailed {
            to: "a@b.com".into(),
            reason: "boom".into(),
        }
        .into();
        assert_eq!(err.kind(), "TransportError");

        let err: Error = LlmError::AuthFailed {
            provider: "openai".into(),
        }
        .into();
        assert_eq!(err.kind(), "LlmError");
    }

    #[test]
    fn display_includes_source_message() {
        let err: Error = CampaignError::NotGenerated(Uuid::nil()).into();
        assert!(err.to_string().contains("no generated email"));
    }
}
