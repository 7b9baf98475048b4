//! Reply reconciler: finds inbound replies to a campaign and records them
//! against the recipient who sent them.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::matching::{
    build_search_query, extract_plain_text, match_recipient, normalize_sender,
    select_original_and_reply,
};
use crate::campaign::model::{EmailReply, Recipient};
use crate::config::ScanConfig;
use crate::error::{CampaignError, DatabaseError, Result};
use crate::mail::{MailTransport, MessageSummary};
use crate::store::Database;

/// Scans the mailbox for replies to campaign emails.
pub struct ReplyReconciler {
    db: Arc<dyn Database>,
    transport: Arc<dyn MailTransport>,
    scan: ScanConfig,
}

impl ReplyReconciler {
    pub fn new(db: Arc<dyn Database>, transport: Arc<dyn MailTransport>, scan: ScanConfig) -> Self {
        Self {
            db,
            transport,
            scan,
        }
    }

    /// Record every new reply to the campaign. Returns how many were added.
    ///
    /// A failing mailbox search aborts the scan. Failures on individual
    /// messages are logged and skipped.
    pub async fn scan_for_replies(&self, campaign_id: Uuid) -> Result<usize> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound(campaign_id))?;
        let generated = self
            .db
            .get_generated_email(campaign_id)
            .await?
            .ok_or(CampaignError::NotGenerated(campaign_id))?;

        let recipients = self.db.list_recipients(campaign_id).await?;
        let tracked_ids: HashSet<String> = recipients
            .iter()
            .filter_map(|r| r.sent_message_id.clone())
            .collect();

        let Some(query) = build_search_query(&generated.subject, &self.scan.owner_address)
        else {
            warn!(
                campaign_id = %campaign_id,
                subject = %generated.subject,
                "Subject has nothing searchable; skipping reply scan"
            );
            return Ok(0);
        };
        let candidates = self.transport.search(&query, self.scan.max_results).await?;
        info!(
            campaign_id = %campaign_id,
            campaign = %campaign.name,
            candidates = candidates.len(),
            "Scanning for replies"
        );

        let mut added = 0;
        for candidate in &candidates {
            match self
                .reconcile(campaign_id, candidate, &recipients, &tracked_ids)
                .await
            {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        campaign_id = %campaign_id,
                        message_id = %candidate.id,
                        error = %e,
                        "Skipping reply candidate"
                    );
                }
            }
        }

        info!(campaign_id = %campaign_id, new_replies = added, "Reply scan complete");
        Ok(added)
    }

    /// Returns `true` when a new reply row was written.
    async fn reconcile(
        &self,
        campaign_id: Uuid,
        candidate: &MessageSummary,
        recipients: &[Recipient],
        tracked_ids: &HashSet<String>,
    ) -> Result<bool> {
        let message = self.transport.get_message(&candidate.id).await?;
        let thread = self.transport.get_thread(&message.thread_id).await?;

        let Some((original, reply)) =
            select_original_and_reply(&thread, &self.scan.owner_address, tracked_ids)
        else {
            debug!(thread_id = %message.thread_id, size = thread.len(), "No reply in thread");
            return Ok(false);
        };

        let Some(from) = reply.sender() else {
            debug!(message_id = %reply.id, "Reply has no From header");
            return Ok(false);
        };
        let sender = normalize_sender(from);

        let Some(recipient) = match_recipient(recipients, &sender) else {
            debug!(sender = %sender, "Sender is not a campaign recipient");
            return Ok(false);
        };

        if self.db.reply_exists(campaign_id, &reply.id).await? {
            debug!(reply_message_id = %reply.id, "Reply already recorded");
            return Ok(false);
        }

        let row = EmailReply::new(
            campaign_id,
            recipient.id,
            original.id.clone(),
            reply.id.clone(),
            reply.thread_id.clone(),
            sender,
            extract_plain_text(&reply.payload),
        );
        match self.db.insert_reply(&row).await {
            Ok(()) => {}
            Err(DatabaseError::Constraint(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        info!(
            campaign_id = %campaign_id,
            recipient = %recipient.email,
            reply_message_id = %reply.id,
            "Recorded reply"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::campaign::model::{Campaign, GeneratedEmail, Tone};
    use crate::error::{Error, TransportError};
    use crate::mail::{InMemoryMailbox, MessagePart, OutgoingEmail};
    use crate::store::LibSqlBackend;

    const OWNER: &str = "owner@example.com";
    const SUBJECT: &str = "Big Savings Inside!!";

    struct Fixture {
        db: Arc<LibSqlBackend>,
        mailbox: Arc<InMemoryMailbox>,
        reconciler: ReplyReconciler,
        campaign: Campaign,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mailbox = Arc::new(InMemoryMailbox::new());

        let campaign = Campaign::new("Spring Sale", "Seasonal discounts", "", Tone::Friendly);
        db.insert_campaign(&campaign).await.unwrap();
        db.upsert_generated_email(&GeneratedEmail {
            campaign_id: campaign.id,
            subject: SUBJECT.into(),
            body_text: "20% off".into(),
            body_html: "<p>20% off</p>".into(),
            generated_at: Utc::now(),
        })
        .await
        .unwrap();

        let reconciler = ReplyReconciler::new(
            db.clone(),
            mailbox.clone(),
            ScanConfig {
                owner_address: OWNER.into(),
                max_results: 50,
            },
        );
        Fixture {
            db,
            mailbox,
            reconciler,
            campaign,
        }
    }

    /// Send the campaign email to a new recipient; returns it with its thread id.
    async fn send_to(fx: &Fixture, email: &str) -> (Recipient, String) {
        let mut recipient = Recipient::new(fx.campaign.id, email, "");
        fx.db.insert_recipient(&recipient).await.unwrap();
        let receipt = fx
            .mailbox
            .send(&OutgoingEmail {
                from: OWNER.into(),
                to: email.into(),
                subject: SUBJECT.into(),
                body_text: "20% off".into(),
                body_html: None,
                attachments: vec![],
            })
            .await
            .unwrap();
        fx.db
            .mark_recipient_sent(recipient.id, Utc::now(), &receipt.message_id)
            .await
            .unwrap();
        recipient.sent_message_id = Some(receipt.message_id);
        (recipient, receipt.thread_id)
    }

    #[tokio::test]
    async fn records_reply_from_recipient() {
        let fx = fixture().await;
        let (alice, thread) = send_to(&fx, "alice@example.com").await;
        let inbound = fx.mailbox.deliver(
            Some(&thread),
            "Alice <alice@example.com>",
            "Re: Big Savings Inside",
            "Count me in!",
        );

        assert_eq!(fx.reconciler.scan_for_replies(fx.campaign.id).await.unwrap(), 1);

        let replies = fx.db.list_replies(fx.campaign.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        let reply = &replies[0];
        assert_eq!(reply.recipient_id, alice.id);
        assert_eq!(reply.reply_message_id, inbound.id);
        assert_eq!(reply.sender, "alice@example.com");
        assert_eq!(reply.reply_content, "Count me in!");
        assert_eq!(Some(&reply.original_message_id), alice.sent_message_id.as_ref());
        assert!(!reply.processed);
    }

    #[tokio::test]
    async fn rescan_is_idempotent() {
        let fx = fixture().await;
        let (_, thread) = send_to(&fx, "alice@example.com").await;
        fx.mailbox
            .deliver(Some(&thread), "alice@example.com", "Re: Big Savings Inside", "Yes");

        assert_eq!(fx.reconciler.scan_for_replies(fx.campaign.id).await.unwrap(), 1);
        assert_eq!(fx.reconciler.scan_for_replies(fx.campaign.id).await.unwrap(), 0);
        assert_eq!(fx.db.list_replies(fx.campaign.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn single_message_thread_is_ignored() {
        let fx = fixture().await;
        send_to(&fx, "alice@example.com").await;
        fx.mailbox
            .deliver(None, "alice@example.com", "Re: Big Savings Inside", "New thread");

        assert_eq!(fx.reconciler.scan_for_replies(fx.campaign.id).await.unwrap(), 0);
        assert!(fx.db.list_replies(fx.campaign.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_sender_is_ignored() {
        let fx = fixture().await;
        let (_, thread) = send_to(&fx, "alice@example.com").await;
        fx.mailbox
            .deliver(Some(&thread), "a.user@example.com", "Re: Big Savings Inside", "Who?");

        assert_eq!(fx.reconciler.scan_for_replies(fx.campaign.id).await.unwrap(), 0);
        assert!(fx.db.list_replies(fx.campaign.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forwarded_address_matches_by_local_part() {
        let fx = fixture().await;
        let (alice, thread) = send_to(&fx, "alice@example.com").await;
        fx.mailbox
            .deliver(Some(&thread), "alice@home.example.org", "Re: Big Savings Inside", "Hi");

        assert_eq!(fx.reconciler.scan_for_replies(fx.campaign.id).await.unwrap(), 1);
        let replies = fx.db.list_replies(fx.campaign.id).await.unwrap();
        assert_eq!(replies[0].recipient_id, alice.id);
    }

    #[tokio::test]
    async fn fetch_failure_skips_only_that_message() {
        let fx = fixture().await;
        let (_, alice_thread) = send_to(&fx, "alice@example.com").await;
        let (_, bob_thread) = send_to(&fx, "bob@example.com").await;
        let broken = fx.mailbox.deliver(
            Some(&alice_thread),
            "alice@example.com",
            "Re: Big Savings Inside",
            "Yes",
        );
        fx.mailbox
            .deliver(Some(&bob_thread), "bob@example.com", "Re: Big Savings Inside", "Me too");
        fx.mailbox.fail_fetch(&broken.id);

        assert_eq!(fx.reconciler.scan_for_replies(fx.campaign.id).await.unwrap(), 1);
        let replies = fx.db.list_replies(fx.campaign.id).await.unwrap();
        assert_eq!(replies[0].sender, "bob@example.com");
    }

    #[tokio::test]
    async fn reply_without_sender_is_ignored() {
        let fx = fixture().await;
        let (_, thread) = send_to(&fx, "alice@example.com").await;
        fx.mailbox.deliver_part(
            Some(&thread),
            MessagePart::text("no idea who sent this").with_header("Subject", "Re: Big Savings Inside"),
        );

        assert_eq!(fx.reconciler.scan_for_replies(fx.campaign.id).await.unwrap(), 0);
        assert!(fx.db.list_replies(fx.campaign.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsearchable_subject_records_nothing() {
        let fx = fixture().await;
        fx.db
            .upsert_generated_email(&GeneratedEmail {
                campaign_id: fx.campaign.id,
                subject: "🎉🎉🎉".into(),
                body_text: "Party".into(),
                body_html: "<p>Party</p>".into(),
                generated_at: Utc::now(),
            })
            .await
            .unwrap();
        fx.db
            .insert_recipient(&Recipient::new(fx.campaign.id, "alice@example.com", ""))
            .await
            .unwrap();
        let lunch = fx
            .mailbox
            .send(&OutgoingEmail {
                from: OWNER.into(),
                to: "alice@example.com".into(),
                subject: "Lunch on Friday?".into(),
                body_text: "Are you free?".into(),
                body_html: None,
                attachments: vec![],
            })
            .await
            .unwrap();
        fx.mailbox.deliver(
            Some(&lunch.thread_id),
            "alice@example.com",
            "Re: Lunch on Friday?",
            "Sure",
        );

        assert_eq!(fx.reconciler.scan_for_replies(fx.campaign.id).await.unwrap(), 0);
        assert!(fx.db.list_replies(fx.campaign.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_failure_propagates() {
        let fx = fixture().await;
        fx.mailbox.fail_searches(true);

        let result = fx.reconciler.scan_for_replies(fx.campaign.id).await;
        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::RequestFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn campaign_without_content_cannot_be_scanned() {
        let fx = fixture().await;
        let bare = Campaign::new("Empty", "t", "", Tone::Professional);
        fx.db.insert_campaign(&bare).await.unwrap();

        let result = fx.reconciler.scan_for_replies(bare.id).await;
        assert!(matches!(
            result,
            Err(Error::Campaign(CampaignError::NotGenerated(id))) if id == bare.id
        ));
    }
}
