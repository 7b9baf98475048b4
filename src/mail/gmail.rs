//! Gmail REST API transport.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::oauth::TokenSource;
use super::{
    DeliveryReceipt, Header, MailMessage, MailTransport, MessagePart, MessageSummary,
    OutgoingEmail, mime,
};
use crate::config::GmailConfig;
use crate::error::TransportError;

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<WireSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSummary {
    id: String,
    thread_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    thread_id: String,
    #[serde(default)]
    payload: Option<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<WireHeader>,
    #[serde(default)]
    body: Option<WireBody>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WireHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireThread {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct SendRequest {
    raw: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id: String,
    #[serde(default)]
    thread_id: String,
}

/// Decode Gmail's base64url body data. Padding is optional.
pub fn decode_body(data: &str) -> Result<String, base64::DecodeError> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('='))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

impl WirePart {
    fn into_part(self, operation: &str) -> Result<MessagePart, TransportError> {
        let body = match self.body.and_then(|b| b.data) {
            Some(data) => Some(decode_body(&data).map_err(|e| TransportError::Malformed {
                operation: operation.to_string(),
                reason: format!("body is not base64url: {e}"),
            })?),
            None => None,
        };
        let parts = self
            .parts
            .into_iter()
            .map(|p| p.into_part(operation))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MessagePart {
            mime_type: self.mime_type,
            headers: self
                .headers
                .into_iter()
                .map(|h| Header {
                    name: h.name,
                    value: h.value,
                })
                .collect(),
            body,
            parts,
        })
    }
}

impl WireMessage {
    fn into_message(self, operation: &str) -> Result<MailMessage, TransportError> {
        let payload = match self.payload {
            Some(part) => part.into_part(operation)?,
            None => MessagePart::default(),
        };
        Ok(MailMessage {
            id: self.id,
            thread_id: self.thread_id,
            payload,
        })
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// Mailbox access through `https://gmail.googleapis.com/gmail/v1/users/me`.
pub struct GmailTransport {
    http: reqwest::Client,
    api_base: String,
    tokens: TokenSource,
}

impl GmailTransport {
    pub fn new(config: &GmailConfig) -> Self {
        let tokens = match &config.access_token {
            Some(token) => TokenSource::fixed(token.clone()),
            None => TokenSource::from_file(config.token_path.clone()),
        };
        Self::with_token_source(&config.api_base, tokens)
    }

    pub fn with_token_source(api_base: &str, tokens: TokenSource) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }

    async fn check(
        operation: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        response.json().await.map_err(|e| TransportError::Malformed {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, TransportError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed {
                operation: operation.to_string(),
                reason: e.to_string(),
            })?;
        let response = Self::check(operation, response).await?;
        Self::decode(operation, response).await
    }
}

fn not_found_as(id: &str, err: TransportError) -> TransportError {
    match err {
        TransportError::Api { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
            TransportError::NotFound(id.to_string())
        }
        other => other,
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn search(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageSummary>, TransportError> {
        let list: ListResponse = self
            .get_json(
                "messages.list",
                "messages",
                &[
                    ("q", query.to_string()),
                    ("maxResults", max_results.to_string()),
                ],
            )
            .await?;

        debug!(query, hits = list.messages.len(), "Mailbox search finished");
        Ok(list
            .messages
            .into_iter()
            .map(|m| MessageSummary {
                id: m.id,
                thread_id: m.thread_id,
            })
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage, TransportError> {
        let wire: WireMessage = self
            .get_json(
                "messages.get",
                &format!("messages/{id}"),
                &[("format", "full".to_string())],
            )
            .await
            .map_err(|e| not_found_as(id, e))?;
        wire.into_message("messages.get")
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Vec<MailMessage>, TransportError> {
        let wire: WireThread = self
            .get_json(
                "threads.get",
                &format!("threads/{thread_id}"),
                &[("format", "full".to_string())],
            )
            .await
            .map_err(|e| not_found_as(thread_id, e))?;
        wire.messages
            .into_iter()
            .map(|m| m.into_message("threads.get"))
            .collect()
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, TransportError> {
        let raw = mime::build_raw_message(email)?;
        let request = SendRequest {
            raw: URL_SAFE_NO_PAD.encode(raw),
        };

        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(self.url("messages/send"))
            .bearer_auth(token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::SendFailed {
                to: email.to.clone(),
                reason: e.to_string(),
            })?;
        let response = Self::check("messages.send", response)
            .await
            .map_err(|e| TransportError::SendFailed {
                to: email.to.clone(),
                reason: e.to_string(),
            })?;
        let sent: SendResponse = Self::decode("messages.send", response).await?;

        info!(to = %email.to, message_id = %sent.id, "Email sent");
        Ok(DeliveryReceipt {
            message_id: sent.id,
            thread_id: sent.thread_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn b64(s: &str) -> String {
        URL_SAFE_NO_PAD.encode(s)
    }

    fn transport(server: &MockServer) -> GmailTransport {
        GmailTransport::with_token_source(
            &server.uri(),
            TokenSource::fixed(SecretString::from("test-token".to_string())),
        )
    }

    fn message_json(id: &str, thread: &str, from: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "threadId": thread,
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": from},
                    {"name": "Subject", "value": "Re: Big Savings Inside!!"}
                ],
                "body": {"size": 0},
                "parts": [
                    {"mimeType": "text/plain", "headers": [], "body": {"data": b64(text)}},
                    {"mimeType": "text/html", "headers": [], "body": {"data": b64("<p>x</p>")}}
                ]
            }
        })
    }

    #[test]
    fn decode_body_accepts_padded_and_unpadded() {
        assert_eq!(decode_body("aGk").unwrap(), "hi");
        assert_eq!(decode_body("aGk=").unwrap(), "hi");
        // '-' and '_' are the URL-safe alphabet
        assert_eq!(decode_body(&b64("??>>")).unwrap(), "??>>");
    }

    #[tokio::test]
    async fn search_sends_query_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .and(query_param("q", "in:inbox subject:\"Spring\""))
            .and(query_param("maxResults", "50"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "m1", "threadId": "t1"}, {"id": "m2", "threadId": "t2"}],
                "resultSizeEstimate": 2
            })))
            .mount(&server)
            .await;

        let hits = transport(&server)
            .search("in:inbox subject:\"Spring\"", 50)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].thread_id, "t2");
    }

    #[tokio::test]
    async fn search_without_messages_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"resultSizeEstimate": 0})),
            )
            .mount(&server)
            .await;

        assert!(transport(&server).search("q", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_message_decodes_parts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/m2"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_json(
                "m2",
                "t1",
                "Alice <alice@example.com>",
                "Yes please!",
            )))
            .mount(&server)
            .await;

        let msg = transport(&server).get_message("m2").await.unwrap();
        assert_eq!(msg.thread_id, "t1");
        assert_eq!(msg.sender(), Some("Alice <alice@example.com>"));
        assert_eq!(msg.payload.parts[0].body.as_deref(), Some("Yes please!"));
        assert!(msg.payload.body.is_none());
    }

    #[tokio::test]
    async fn get_thread_keeps_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/threads/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "t1",
                "messages": [
                    message_json("m1", "t1", "owner@example.com", "Sale!"),
                    message_json("m2", "t1", "alice@example.com", "Yes please!"),
                ]
            })))
            .mount(&server)
            .await;

        let thread = transport(&server).get_thread("t1").await.unwrap();
        let ids: Vec<_> = thread.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[tokio::test]
    async fn missing_message_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let result = transport(&server).get_message("gone").await;
        assert!(matches!(result, Err(TransportError::NotFound(id)) if id == "gone"));
    }

    #[tokio::test]
    async fn server_error_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
            .mount(&server)
            .await;

        let result = transport(&server).search("q", 5).await;
        assert!(matches!(
            result,
            Err(TransportError::Api { status: 500, ref body, .. }) if body == "backend down"
        ));
    }

    #[tokio::test]
    async fn send_posts_base64url_raw_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/send"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(|req: &Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                let raw = decode_body(body["raw"].as_str().unwrap()).unwrap();
                assert!(raw.contains("Subject: Hello"));
                assert!(raw.contains("To: alice@example.com"));
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "sent-1", "threadId": "thr-1"}))
            })
            .mount(&server)
            .await;

        let receipt = transport(&server)
            .send(&OutgoingEmail {
                from: "owner@example.com".into(),
                to: "alice@example.com".into(),
                subject: "Hello".into(),
                body_text: "Hi".into(),
                body_html: None,
                attachments: vec![],
            })
            .await
            .unwrap();
        assert_eq!(receipt.message_id, "sent-1");
        assert_eq!(receipt.thread_id, "thr-1");
    }

    #[tokio::test]
    async fn send_rejection_is_send_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/send"))
            .respond_with(ResponseTemplate::new(403).set_body_string("quota"))
            .mount(&server)
            .await;

        let result = transport(&server)
            .send(&OutgoingEmail {
                from: "owner@example.com".into(),
                to: "alice@example.com".into(),
                subject: "Hello".into(),
                body_text: "Hi".into(),
                body_html: None,
                attachments: vec![],
            })
            .await;
        assert!(matches!(result, Err(TransportError::SendFailed { ref to, .. }) if to == "alice@example.com"));
    }
}
