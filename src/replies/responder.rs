//! Reply responder: drafts and sends an answer to every pending reply.
//!
//! Outcomes per reply:
//! - recipient gone or empty draft: skipped, row stays pending
//! - any error: row marked processed without a reply (terminal)
//! - success: row marked processed and sent

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::campaign::model::{Campaign, EmailReply, GeneratedEmail};
use crate::error::{CampaignError, Error, Result};
use crate::generator::{ContentGenerator, ReplyContext, escape_html};
use crate::mail::{MailTransport, OutgoingEmail};
use crate::store::Database;

/// Why a pending reply was left for a later run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    RecipientMissing,
    NoReplyGenerated,
}

/// Result of handling one reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyOutcome {
    Sent {
        reply_id: Uuid,
        recipient: String,
        message_id: String,
    },
    Skipped {
        reply_id: Uuid,
        reason: SkipReason,
    },
    Failed {
        reply_id: Uuid,
        error: String,
        error_type: String,
    },
}

/// Aggregate of one `process_pending` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<ReplyOutcome>,
}

impl ProcessSummary {
    fn record(&mut self, outcome: ReplyOutcome) {
        match outcome {
            ReplyOutcome::Sent { .. } => self.success += 1,
            ReplyOutcome::Skipped { .. } => self.skipped += 1,
            ReplyOutcome::Failed { .. } => self.failed += 1,
        }
        self.details.push(outcome);
    }
}

/// Plain-text draft as a single HTML paragraph.
pub fn reply_html(draft: &str) -> String {
    format!("<p>{}</p>", escape_html(draft).replace('\n', "<br>"))
}

/// Sends AI-drafted answers to recorded replies.
pub struct ReplyResponder {
    db: Arc<dyn Database>,
    transport: Arc<dyn MailTransport>,
    generator: Arc<ContentGenerator>,
    sender: String,
}

impl ReplyResponder {
    pub fn new(
        db: Arc<dyn Database>,
        transport: Arc<dyn MailTransport>,
        generator: Arc<ContentGenerator>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            db,
            transport,
            generator,
            sender: sender.into(),
        }
    }

    /// Answer every unprocessed reply of the campaign.
    ///
    /// One reply failing never stops the batch; there is no rollback of
    /// replies already sent.
    pub async fn process_pending(&self, campaign_id: Uuid) -> Result<ProcessSummary> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound(campaign_id))?;
        let generated = self.db.get_generated_email(campaign_id).await?;
        let pending = self.db.list_pending_replies(campaign_id).await?;

        let mut summary = ProcessSummary {
            total: pending.len(),
            ..Default::default()
        };

        for reply in &pending {
            let outcome = match self.respond(&campaign, generated.as_ref(), reply).await {
                Ok(outcome) => outcome,
                Err(e) => self.give_up(reply, e).await,
            };
            summary.record(outcome);
        }

        info!(
            campaign_id = %campaign_id,
            total = summary.total,
            sent = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            "Reply processing completed"
        );
        Ok(summary)
    }

    async fn respond(
        &self,
        campaign: &Campaign,
        generated: Option<&GeneratedEmail>,
        reply: &EmailReply,
    ) -> Result<ReplyOutcome> {
        let Some(recipient) = self.db.get_recipient(reply.recipient_id).await? else {
            warn!(reply_id = %reply.id, recipient_id = %reply.recipient_id, "Recipient no longer exists");
            return Ok(ReplyOutcome::Skipped {
                reply_id: reply.id,
                reason: SkipReason::RecipientMissing,
            });
        };
        let generated = generated.ok_or(CampaignError::NotGenerated(campaign.id))?;

        let draft = self
            .generator
            .draft_reply(&ReplyContext {
                campaign_name: campaign.name.clone(),
                original_body: generated.body_text.clone(),
                reply_text: reply.reply_content.clone(),
                tone: campaign.tone,
            })
            .await?;
        let Some(draft) = draft else {
            warn!(reply_id = %reply.id, "No reply generated");
            return Ok(ReplyOutcome::Skipped {
                reply_id: reply.id,
                reason: SkipReason::NoReplyGenerated,
            });
        };

        let receipt = self
            .transport
            .send(&OutgoingEmail {
                from: self.sender.clone(),
                to: recipient.email.clone(),
                subject: format!("Re: {}", generated.subject),
                body_html: Some(reply_html(&draft)),
                body_text: draft,
                attachments: Vec::new(),
            })
            .await?;

        self.db.mark_reply_sent(reply.id).await?;
        info!(reply_id = %reply.id, to = %recipient.email, "Reply sent");

        Ok(ReplyOutcome::Sent {
            reply_id: reply.id,
            recipient: recipient.email,
            message_id: receipt.message_id,
        })
    }

    /// Mark the row processed so it is never retried, and report the error.
    async fn give_up(&self, reply: &EmailReply, err: Error) -> ReplyOutcome {
        error!(reply_id = %reply.id, error = %err, "Failed to process reply");
        if let Err(e) = self.db.mark_reply_processed(reply.id).await {
            error!(reply_id = %reply.id, error = %e, "Failed to mark reply processed");
        }
        ReplyOutcome::Failed {
            reply_id: reply.id,
            error: err.to_string(),
            error_type: err.kind().to_string(),
        }
    }
}
