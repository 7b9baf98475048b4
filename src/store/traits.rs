//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::campaign::model::{Campaign, EmailReply, GeneratedEmail, Recipient, ReplyStats};
use crate::error::DatabaseError;

/// Backend-agnostic database trait covering campaigns, recipients,
/// generated content and replies.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Campaigns ───────────────────────────────────────────────────

    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), DatabaseError>;

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError>;

    /// All campaigns, newest first.
    async fn list_campaigns(&self) -> Result<Vec<Campaign>, DatabaseError>;

    // ── Recipients ──────────────────────────────────────────────────

    /// Insert a recipient. Returns `false` if the campaign already has this
    /// address (case-insensitive).
    async fn insert_recipient(&self, recipient: &Recipient) -> Result<bool, DatabaseError>;

    async fn get_recipient(&self, id: Uuid) -> Result<Option<Recipient>, DatabaseError>;

    async fn list_recipients(&self, campaign_id: Uuid) -> Result<Vec<Recipient>, DatabaseError>;

    /// Record a completed campaign send.
    async fn mark_recipient_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        message_id: &str,
    ) -> Result<(), DatabaseError>;

    /// Returns `true` if a row was deleted.
    async fn delete_recipient(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Generated content ───────────────────────────────────────────

    /// Insert or overwrite the campaign's generated email.
    async fn upsert_generated_email(&self, email: &GeneratedEmail) -> Result<(), DatabaseError>;

    async fn get_generated_email(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<GeneratedEmail>, DatabaseError>;

    // ── Replies ─────────────────────────────────────────────────────

    /// Insert a reply. A second row for the same (campaign, reply message)
    /// fails with `DatabaseError::Constraint`.
    async fn insert_reply(&self, reply: &EmailReply) -> Result<(), DatabaseError>;

    async fn reply_exists(
        &self,
        campaign_id: Uuid,
        reply_message_id: &str,
    ) -> Result<bool, DatabaseError>;

    async fn get_reply(&self, id: Uuid) -> Result<Option<EmailReply>, DatabaseError>;

    async fn list_replies(&self, campaign_id: Uuid) -> Result<Vec<EmailReply>, DatabaseError>;

    /// Replies with `processed = false`, oldest first.
    async fn list_pending_replies(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<EmailReply>, DatabaseError>;

    /// `processed = true, reply_sent = true`.
    async fn mark_reply_sent(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// `processed = true`; `reply_sent` is left alone.
    async fn mark_reply_processed(&self, id: Uuid) -> Result<(), DatabaseError>;

    async fn reply_stats(&self, campaign_id: Uuid) -> Result<ReplyStats, DatabaseError>;
}
