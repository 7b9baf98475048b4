//! Campaign domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Writing tone requested for a campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Friendly,
    Urgent,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Friendly => "friendly",
            Tone::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "professional" => Ok(Tone::Professional),
            "friendly" => Ok(Tone::Friendly),
            "urgent" => Ok(Tone::Urgent),
            other => Err(format!("unknown tone '{other}'")),
        }
    }
}

/// A named batch of outbound emails sharing one generated subject/body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub topic: String,
    pub details: String,
    pub tone: Tone,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        details: impl Into<String>,
        tone: Tone,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            topic: topic.into(),
            details: details.into(),
            tone,
            created_at: Utc::now(),
        }
    }
}

/// One addressee within a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub campaign_id: Uuid,
    /// Trimmed, lowercased address.
    pub email: String,
    pub name: String,
    pub is_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    /// Provider id of the outbound campaign message.
    pub sent_message_id: Option<String>,
}

impl Recipient {
    pub fn new(campaign_id: Uuid, email: &str, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            email: email.trim().to_lowercase(),
            name: name.into(),
            is_sent: false,
            sent_at: None,
            sent_message_id: None,
        }
    }
}

/// LLM-written campaign content. At most one per campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedEmail {
    pub campaign_id: Uuid,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub generated_at: DateTime<Utc>,
}

/// Lifecycle of a recorded reply, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyState {
    /// Not yet handled by the responder.
    Pending,
    /// An AI response went out.
    Sent,
    /// Generation or send failed; never retried automatically.
    GaveUp,
}

/// An inbound message attributed to a campaign recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailReply {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_id: Uuid,
    pub original_message_id: String,
    pub reply_message_id: String,
    pub thread_id: String,
    pub sender: String,
    pub reply_content: String,
    pub processed: bool,
    pub reply_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailReply {
    pub fn new(
        campaign_id: Uuid,
        recipient_id: Uuid,
        original_message_id: impl Into<String>,
        reply_message_id: impl Into<String>,
        thread_id: impl Into<String>,
        sender: impl Into<String>,
        reply_content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            recipient_id,
            original_message_id: original_message_id.into(),
            reply_message_id: reply_message_id.into(),
            thread_id: thread_id.into(),
            sender: sender.into(),
            reply_content: reply_content.into(),
            processed: false,
            reply_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> ReplyState {
        match (self.processed, self.reply_sent) {
            (false, _) => ReplyState::Pending,
            (true, true) => ReplyState::Sent,
            (true, false) => ReplyState::GaveUp,
        }
    }
}

/// Reply counters for a campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyStats {
    pub total: u32,
    pub pending: u32,
    pub sent: u32,
    pub gave_up: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_parses_case_insensitively() {
        assert_eq!("Friendly".parse::<Tone>().unwrap(), Tone::Friendly);
        assert_eq!(" URGENT ".parse::<Tone>().unwrap(), Tone::Urgent);
        assert!("sarcastic".parse::<Tone>().is_err());
    }

    #[test]
    fn tone_serializes_lowercase() {
        let json = serde_json::to_string(&Tone::Professional).unwrap();
        assert_eq!(json, "\"professional\"");
    }

    #[test]
    fn recipient_email_is_normalized() {
        let r = Recipient::new(Uuid::new_v4(), "  Alice@Example.COM ", "Alice");
        assert_eq!(r.email, "alice@example.com");
        assert!(!r.is_sent);
    }

    #[test]
    fn reply_state_follows_flags() {
        let mut reply = EmailReply::new(Uuid::new_v4(), Uuid::new_v4(), "o", "r", "t", "s", "c");
        assert_eq!(reply.state(), ReplyState::Pending);
        reply.processed = true;
        assert_eq!(reply.state(), ReplyState::GaveUp);
        reply.reply_sent = true;
        assert_eq!(reply.state(), ReplyState::Sent);
    }
}
