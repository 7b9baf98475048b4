//! Mail transport: mailbox search, message/thread fetch and outbound send.
//!
//! `MailTransport` is the seam the reconciler, responder and campaign service
//! talk to. `GmailTransport` speaks the Gmail REST API; `InMemoryMailbox` is
//! an in-process mailbox for dry runs and tests.

pub mod gmail;
pub mod memory;
pub mod mime;
pub mod oauth;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use gmail::GmailTransport;
pub use memory::InMemoryMailbox;

/// A search hit: message id plus the thread it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
}

/// A single header line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// One node of a MIME tree. `body` holds the decoded text when the part
/// carries inline data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// A leaf `text/plain` part.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            mime_type: "text/plain".into(),
            headers: Vec::new(),
            body: Some(body.into()),
            parts: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// A fetched message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    pub thread_id: String,
    pub payload: MessagePart,
}

impl MailMessage {
    /// Raw `From` header.
    pub fn sender(&self) -> Option<&str> {
        self.payload.header("From")
    }

    pub fn subject(&self) -> Option<&str> {
        self.payload.header("Subject")
    }
}

/// A file attached to an outgoing email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// An email to send.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body_text: String,
    /// Falls back to `body_text` when absent.
    pub body_html: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Provider identifiers of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub thread_id: String,
}

/// Mailbox access used by the campaign workflow.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run a provider search query, capped at `max_results` hits.
    async fn search(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageSummary>, TransportError>;

    async fn get_message(&self, id: &str) -> Result<MailMessage, TransportError>;

    /// All messages of a thread in thread order.
    async fn get_thread(&self, thread_id: &str) -> Result<Vec<MailMessage>, TransportError>;

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, TransportError>;
}
