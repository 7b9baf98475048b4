//! OAuth access tokens for the Gmail API.
//!
//! Either a pre-issued static token, or an authorized-user token file
//! (`client_id`, `client_secret`, `refresh_token`, `token`, `expiry`,
//! `token_uri`). File tokens are refreshed through the token endpoint when
//! expired and the refreshed token is written back. Obtaining the first
//! token file (interactive consent) happens outside this service.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::TransportError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the recorded expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Authorized-user credentials as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// Fields we don't use (scopes, account, ...) survive a rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl AuthorizedUser {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expiry) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(expiry)) => expiry - Duration::seconds(EXPIRY_SKEW_SECS) > now,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

enum Source {
    Static(SecretString),
    File {
        path: PathBuf,
        cached: Mutex<Option<AuthorizedUser>>,
    },
}

/// Hands out bearer tokens for mailbox requests.
pub struct TokenSource {
    source: Source,
    http: reqwest::Client,
}

impl TokenSource {
    /// Always use `token`.
    pub fn fixed(token: SecretString) -> Self {
        Self {
            source: Source::Static(token),
            http: reqwest::Client::new(),
        }
    }

    /// Read credentials from an authorized-user file, refreshing as needed.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File {
                path: path.into(),
                cached: Mutex::new(None),
            },
            http: reqwest::Client::new(),
        }
    }

    /// A bearer token valid for at least the next minute.
    pub async fn access_token(&self) -> Result<SecretString, TransportError> {
        match &self.source {
            Source::Static(token) => Ok(SecretString::from(token.expose_secret().to_string())),
            Source::File { path, cached } => {
                let mut guard = cached.lock().await;
                if guard.is_none() {
                    *guard = Some(load_authorized_user(path).await?);
                }
                let Some(creds) = guard.as_mut() else {
                    return Err(TransportError::Auth("token cache empty".into()));
                };

                if !creds.is_fresh(Utc::now()) {
                    self.refresh(creds).await?;
                    save_authorized_user(path, creds).await?;
                    info!(path = %path.display(), "Refreshed Gmail access token");
                }

                creds
                    .token
                    .clone()
                    .map(SecretString::from)
                    .ok_or_else(|| TransportError::Auth("no access token after refresh".into()))
            }
        }
    }

    async fn refresh(&self, creds: &mut AuthorizedUser) -> Result<(), TransportError> {
        debug!(token_uri = %creds.token_uri, "Refreshing OAuth access token");
        let response = self
            .http
            .post(&creds.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", creds.refresh_token.as_str()),
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TransportError::Auth(format!("refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Auth(format!(
                "token refresh failed ({status}): {body}"
            )));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Auth(format!("invalid refresh response: {e}")))?;

        creds.token = Some(body.access_token);
        creds.expiry = body
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        if let Some(rotated) = body.refresh_token {
            creds.refresh_token = rotated;
        }
        Ok(())
    }
}

async fn load_authorized_user(path: &Path) -> Result<AuthorizedUser, TransportError> {
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        TransportError::Auth(format!(
            "cannot read token file {}: {e}. Complete the OAuth consent flow first",
            path.display()
        ))
    })?;
    serde_json::from_str(&json)
        .map_err(|e| TransportError::Auth(format!("invalid token file {}: {e}", path.display())))
}

async fn save_authorized_user(path: &Path, creds: &AuthorizedUser) -> Result<(), TransportError> {
    let json = serde_json::to_string_pretty(creds)
        .map_err(|e| TransportError::Auth(format!("failed to serialize token: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| TransportError::Auth(format!("failed to write token file: {e}")))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| TransportError::Auth(format!("failed to replace token file: {e}")))?;
    Ok(())
}
