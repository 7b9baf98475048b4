//! In-process mailbox.
//!
//! Keeps messages and threads in memory and understands the small subset of
//! Gmail search syntax the service issues: `in:inbox`, `-from:ADDR`,
//! `subject:"PHRASE"` and `subject:WORD` (any subject term may match).
//! Used for dry runs (`CAMPAIGN_MAILER_TRANSPORT=memory`) and as a test fake.

use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, Mutex, MutexGuard};

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use super::{
    DeliveryReceipt, MailMessage, MailTransport, MessagePart, MessageSummary, OutgoingEmail,
};
use crate::error::TransportError;

#[derive(Debug, Clone)]
struct StoredMessage {
    message: MailMessage,
    inbound: bool,
}

#[derive(Default)]
struct MailboxState {
    next_id: u64,
    /// Message ids in insertion order.
    order: Vec<String>,
    messages: HashMap<String, StoredMessage>,
    threads: HashMap<String, Vec<String>>,
    sent: Vec<OutgoingEmail>,
    failing_recipients: HashSet<String>,
    failing_fetches: HashSet<String>,
    fail_search: bool,
}

impl MailboxState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn store(&mut self, thread_id: Option<&str>, payload: MessagePart, inbound: bool) -> MailMessage {
        let id = self.next("msg-");
        let thread_id = match thread_id {
            Some(t) => t.to_string(),
            None => self.next("thread-"),
        };
        let message = MailMessage {
            id: id.clone(),
            thread_id: thread_id.clone(),
            payload,
        };
        self.order.push(id.clone());
        self.threads.entry(thread_id).or_default().push(id.clone());
        self.messages.insert(
            id,
            StoredMessage {
                message: message.clone(),
                inbound,
            },
        );
        message
    }
}

/// Parsed search query.
#[derive(Debug, Default, PartialEq, Eq)]
struct SearchFilter {
    inbox_only: bool,
    excluded_senders: Vec<String>,
    subjects: Vec<String>,
}

static SUBJECT_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)subject:(?:"([^"]*)"|([^\s()]+))"#).expect("subject term regex is valid")
});

static EXCLUDED_SENDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)-from:([^\s()]+)").expect("excluded sender regex is valid")
});

impl SearchFilter {
    fn parse(query: &str) -> Self {
        let subjects = SUBJECT_TERM
            .captures_iter(query)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let excluded_senders = EXCLUDED_SENDER
            .captures_iter(query)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .collect();
        Self {
            inbox_only: query.to_lowercase().contains("in:inbox"),
            excluded_senders,
            subjects,
        }
    }

    fn matches(&self, stored: &StoredMessage) -> bool {
        if self.inbox_only && !stored.inbound {
            return false;
        }
        let from = stored.message.sender().unwrap_or_default().to_lowercase();
        if self.excluded_senders.iter().any(|x| from.contains(x.as_str())) {
            return false;
        }
        if self.subjects.is_empty() {
            return true;
        }
        let subject = stored.message.subject().unwrap_or_default().to_lowercase();
        self.subjects.iter().any(|s| subject.contains(s.as_str()))
    }
}

/// A `MailTransport` that never leaves the process.
#[derive(Default)]
pub struct InMemoryMailbox {
    state: Mutex<MailboxState>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop an inbound message into the inbox. `thread_id = None` starts a
    /// new thread.
    pub fn deliver(
        &self,
        thread_id: Option<&str>,
        from: &str,
        subject: &str,
        body: &str,
    ) -> MailMessage {
        let payload = MessagePart::text(body)
            .with_header("From", from)
            .with_header("Subject", subject);
        self.deliver_part(thread_id, payload)
    }

    /// Like `deliver`, with the payload (and its headers) built by the caller.
    pub fn deliver_part(&self, thread_id: Option<&str>, payload: MessagePart) -> MailMessage {
        self.state().store(thread_id, payload, true)
    }

    /// Everything passed to `send`, in order.
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.state().sent.clone()
    }

    /// Make every send to `address` fail.
    pub fn fail_sends_to(&self, address: &str) {
        self.state()
            .failing_recipients
            .insert(address.to_lowercase());
    }

    /// Make `get_message(id)` fail.
    pub fn fail_fetch(&self, message_id: &str) {
        self.state().failing_fetches.insert(message_id.to_string());
    }

    /// Make every search fail.
    pub fn fail_searches(&self, fail: bool) {
        self.state().fail_search = fail;
    }
}

#[async_trait]
impl MailTransport for InMemoryMailbox {
    fn name(&self) -> &str {
        "memory"
    }

    async fn search(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageSummary>, TransportError> {
        let state = self.state();
        if state.fail_search {
            return Err(TransportError::RequestFailed {
                operation: "search".into(),
                reason: "search disabled".into(),
            });
        }

        let filter = SearchFilter::parse(query);
        // Newest first, like the Gmail API.
        Ok(state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.messages.get(id))
            .filter(|stored| filter.matches(stored))
            .take(max_results as usize)
            .map(|stored| MessageSummary {
                id: stored.message.id.clone(),
                thread_id: stored.message.thread_id.clone(),
            })
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage, TransportError> {
        let state = self.state();
        if state.failing_fetches.contains(id) {
            return Err(TransportError::RequestFailed {
                operation: "get_message".into(),
                reason: format!("fetch of {id} disabled"),
            });
        }
        state
            .messages
            .get(id)
            .map(|stored| stored.message.clone())
            .ok_or_else(|| TransportError::NotFound(id.to_string()))
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Vec<MailMessage>, TransportError> {
        let state = self.state();
        let ids = state
            .threads
            .get(thread_id)
            .ok_or_else(|| TransportError::NotFound(thread_id.to_string()))?;
        Ok(ids
            .iter()
            .filter_map(|id| state.messages.get(id))
            .map(|stored| stored.message.clone())
            .collect())
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, TransportError> {
        let mut state = self.state();
        if state.failing_recipients.contains(&email.to.to_lowercase()) {
            return Err(TransportError::SendFailed {
                to: email.to.clone(),
                reason: "recipient rejected".into(),
            });
        }

        let payload = MessagePart::text(email.body_text.clone())
            .with_header("From", email.from.clone())
            .with_header("To", email.to.clone())
            .with_header("Subject", email.subject.clone());
        let message = state.store(None, payload, false);
        state.sent.push(email.clone());

        info!(to = %email.to, message_id = %message.id, "Email recorded in memory mailbox");
        Ok(DeliveryReceipt {
            message_id: message.id,
            thread_id: message.thread_id,
        })
    }
}
