//! Campaign workflow: campaign and recipient management, content generation
//! and the outbound send.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{Campaign, GeneratedEmail, Recipient, ReplyStats, Tone};
use crate::error::{CampaignError, Error, Result};
use crate::generator::{ContentGenerator, EmailBrief};
use crate::mail::{Attachment, MailTransport, OutgoingEmail};
use crate::store::Database;

static VALID_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email validation regex is valid")
});

/// Input for `create_campaign`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub topic: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub tone: Tone,
}

/// One row of a recipient import.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipientInput {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

/// Result of a recipient import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    /// Addresses already present in the campaign (or repeated in the input).
    pub duplicates: Vec<String>,
    /// Entries that are not email addresses.
    pub invalid: Vec<String>,
}

/// Per-recipient send result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent { recipient: String, message_id: String },
    Failed { recipient: String, error: String },
}

/// Result of a campaign send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub details: Vec<SendOutcome>,
}

/// Split campaign details into key points: one per non-empty line, with a
/// leading `-` or `*` bullet removed.
pub fn key_points(details: &str) -> Vec<String> {
    details
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

pub struct CampaignService {
    db: Arc<dyn Database>,
    transport: Arc<dyn MailTransport>,
    generator: Arc<ContentGenerator>,
    sender: String,
}

impl CampaignService {
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

    pub async fn create_campaign(&self, input: NewCampaign) -> Result<Campaign> {
        let name = input.name.trim();
        let topic = input.topic.trim();
        if name.is_empty() {
            return Err(CampaignError::Validation("name is required".into()).into());
        }
        if topic.is_empty() {
            return Err(CampaignError::Validation("topic is required".into()).into());
        }

        let campaign = Campaign::new(name, topic, input.details, input.tone);
        self.db.insert_campaign(&campaign).await?;
        info!(campaign_id = %campaign.id, name = %campaign.name, "Campaign created");
        Ok(campaign)
    }

    pub async fn get_campaign(&self, id: Uuid) -> Result<Campaign> {
        Ok(self
            .db
            .get_campaign(id)
            .await?
            .ok_or(CampaignError::NotFound(id))?)
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self.db.list_campaigns().await?)
    }

    pub async fn list_recipients(&self, campaign_id: Uuid) -> Result<Vec<Recipient>> {
        self.get_campaign(campaign_id).await?;
        Ok(self.db.list_recipients(campaign_id).await?)
    }

    pub async fn delete_recipient(&self, id: Uuid) -> Result<()> {
        if !self.db.delete_recipient(id).await? {
            return Err(CampaignError::RecipientNotFound(id).into());
        }
        info!(recipient_id = %id, "Recipient deleted");
        Ok(())
    }

    /// Add recipients, skipping invalid addresses and duplicates.
    pub async fn import_recipients(
        &self,
        campaign_id: Uuid,
        rows: Vec<RecipientInput>,
    ) -> Result<ImportSummary> {
        self.get_campaign(campaign_id).await?;

        let mut summary = ImportSummary::default();
        let mut seen = HashSet::new();
        for row in rows {
            let email = row.email.trim().to_lowercase();
            if !VALID_EMAIL.is_match(&email) {
                summary.invalid.push(row.email);
                continue;
            }
            if !seen.insert(email.clone()) {
                summary.duplicates.push(email);
                continue;
            }

            let recipient = Recipient::new(campaign_id, &email, row.name.trim());
            if self.db.insert_recipient(&recipient).await? {
                summary.created += 1;
            } else {
                summary.duplicates.push(email);
            }
        }

        info!(
            campaign_id = %campaign_id,
            created = summary.created,
            duplicates = summary.duplicates.len(),
            invalid = summary.invalid.len(),
            "Recipients imported"
        );
        Ok(summary)
    }

    /// Write (or rewrite) the campaign's email with the LLM.
    pub async fn generate_content(&self, campaign_id: Uuid) -> Result<GeneratedEmail> {
        let campaign = self.get_campaign(campaign_id).await?;
        let brief = EmailBrief {
            purpose: campaign.topic.clone(),
            key_points: key_points(&campaign.details),
            tone: campaign.tone,
        };

        let draft = self.generator.generate_email(&brief).await?;
        let email = GeneratedEmail {
            campaign_id,
            subject: draft.subject,
            body_text: draft.body_text,
            body_html: draft.body_html,
            generated_at: Utc::now(),
        };
        self.db.upsert_generated_email(&email).await?;

        info!(campaign_id = %campaign_id, subject = %email.subject, "Campaign content generated");
        Ok(email)
    }

    pub async fn preview(&self, campaign_id: Uuid) -> Result<GeneratedEmail> {
        self.get_campaign(campaign_id).await?;
        Ok(self
            .db
            .get_generated_email(campaign_id)
            .await?
            .ok_or(CampaignError::NotGenerated(campaign_id))?)
    }

    /// Mail the generated email to every recipient not yet sent to.
    pub async fn send_emails(
        &self,
        campaign_id: Uuid,
        attachments: Vec<Attachment>,
    ) -> Result<SendSummary> {
        let email = self.preview(campaign_id).await?;
        let pending: Vec<Recipient> = self
            .db
            .list_recipients(campaign_id)
            .await?
            .into_iter()
            .filter(|r| !r.is_sent)
            .collect();

        let mut summary = SendSummary {
            total: pending.len(),
            ..Default::default()
        };

        for recipient in pending {
            let outgoing = OutgoingEmail {
                from: self.sender.clone(),
                to: recipient.email.clone(),
                subject: email.subject.clone(),
                body_text: email.body_text.clone(),
                body_html: Some(email.body_html.clone()),
                attachments: attachments.clone(),
            };

            let result = match self.transport.send(&outgoing).await {
                Ok(receipt) => self
                    .db
                    .mark_recipient_sent(recipient.id, Utc::now(), &receipt.message_id)
                    .await
                    .map(|()| receipt.message_id)
                    .map_err(Error::from),
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(message_id) => {
                    summary.sent += 1;
                    summary.details.push(SendOutcome::Sent {
                        recipient: recipient.email,
                        message_id,
                    });
                }
                Err(e) => {
                    error!(campaign_id = %campaign_id, to = %recipient.email, error = %e, "Campaign send failed");
                    summary.failed += 1;
                    summary.details.push(SendOutcome::Failed {
                        recipient: recipient.email,
                        error: e.to_string(),
                    });
                }
            }
        }

        if summary.total == 0 {
            warn!(campaign_id = %campaign_id, "No unsent recipients");
        }
        info!(
            campaign_id = %campaign_id,
            total = summary.total,
            sent = summary.sent,
            failed = summary.failed,
            "Campaign send finished"
        );
        Ok(summary)
    }

    pub async fn reply_stats(&self, campaign_id: Uuid) -> Result<ReplyStats> {
        self.get_campaign(campaign_id).await?;
        Ok(self.db.reply_stats(campaign_id).await?)
    }

    /// `generate_content` followed by `send_emails`.
    pub async fn generate_and_send(
        &self,
        campaign_id: Uuid,
        attachments: Vec<Attachment>,
    ) -> Result<(GeneratedEmail, SendSummary)> {
        let email = self.generate_content(campaign_id).await?;
        let summary = self.send_emails(campaign_id, attachments).await?;
        Ok((email, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use crate::config::GeneratorConfig;
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::mail::InMemoryMailbox;
    use crate::store::LibSqlBackend;

    struct StubLlm;

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: "Subject: Big Savings Inside!!\n---\nHello friend\nShop now".into(),
                input_tokens: 1,
                output_tokens: 1,
            })
        }
    }

    async fn service() -> (CampaignService, Arc<InMemoryMailbox>, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mailbox = Arc::new(InMemoryMailbox::new());
        let generator = Arc::new(ContentGenerator::new(
            Arc::new(StubLlm),
            GeneratorConfig::default(),
        ));
        let service =
            CampaignService::new(db.clone(), mailbox.clone(), generator, "owner@example.com");
        (service, mailbox, db)
    }

    async fn campaign(service: &CampaignService) -> Campaign {
        service
            .create_campaign(NewCampaign {
                name: "Spring Sale".into(),
                topic: "Seasonal discounts".into(),
                details: "- 20% off\n* free shipping\n\n".into(),
                tone: Tone::Friendly,
            })
            .await
            .unwrap()
    }

    fn rows(emails: &[&str]) -> Vec<RecipientInput> {
        emails
            .iter()
            .map(|e| RecipientInput {
                email: e.to_string(),
                name: String::new(),
            })
            .collect()
    }

    #[test]
    fn key_points_strip_bullets() {
        assert_eq!(
            key_points("- 20% off\n  * free shipping \n\nends Sunday"),
            ["20% off", "free shipping", "ends Sunday"]
        );
    }

    #[tokio::test]
    async fn create_requires_name_and_topic() {
        let (service, _, _) = service().await;
        let result = service
            .create_campaign(NewCampaign {
                name: "  ".into(),
                topic: "t".into(),
                details: String::new(),
                tone: Tone::Professional,
            })
            .await;
        assert!(matches!(
            result,
            Err(Error::Campaign(CampaignError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn import_dedups_and_rejects_invalid() {
        let (service, _, _) = service().await;
        let c = campaign(&service).await;

        let first = service
            .import_recipients(c.id, rows(&["alice@example.com", "not-an-email", "Bob@Example.com"]))
            .await
            .unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.invalid, ["not-an-email"]);

        let second = service
            .import_recipients(c.id, rows(&["ALICE@example.com", "carol@example.com", "carol@example.com"]))
            .await
            .unwrap();
        assert_eq!(second.created, 1);
        assert_eq!(second.duplicates, ["alice@example.com", "carol@example.com"]);

        let emails: Vec<_> = service
            .list_recipients(c.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.email)
            .collect();
        assert_eq!(emails, ["alice@example.com", "bob@example.com", "carol@example.com"]);
    }

    #[tokio::test]
    async fn generate_content_stores_email() {
        let (service, _, _) = service().await;
        let c = campaign(&service).await;

        let email = service.generate_content(c.id).await.unwrap();
        assert_eq!(email.subject, "Big Savings Inside!!");
        assert_eq!(email.body_text, "Hello friend\nShop now");
        assert_eq!(service.preview(c.id).await.unwrap(), email);
    }

    #[tokio::test]
    async fn preview_before_generation_fails() {
        let (service, _, _) = service().await;
        let c = campaign(&service).await;
        assert!(matches!(
            service.preview(c.id).await,
            Err(Error::Campaign(CampaignError::NotGenerated(_)))
        ));
    }

    #[tokio::test]
    async fn send_skips_sent_and_survives_failures() {
        let (service, mailbox, db) = service().await;
        let c = campaign(&service).await;
        service
            .import_recipients(c.id, rows(&["alice@example.com", "bob@example.com"]))
            .await
            .unwrap();
        mailbox.fail_sends_to("bob@example.com");

        let (_, summary) = service.generate_and_send(c.id, vec![]).await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 1);

        let recipients = db.list_recipients(c.id).await.unwrap();
        let alice = recipients.iter().find(|r| r.email == "alice@example.com").unwrap();
        assert!(alice.is_sent);
        assert!(alice.sent_message_id.is_some());
        let bob = recipients.iter().find(|r| r.email == "bob@example.com").unwrap();
        assert!(!bob.is_sent);

        // Second send retries only bob.
        let again = service.send_emails(c.id, vec![]).await.unwrap();
        assert_eq!(again.total, 1);
        assert_eq!(mailbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn send_passes_attachments() {
        let (service, mailbox, _) = service().await;
        let c = campaign(&service).await;
        service
            .import_recipients(c.id, rows(&["alice@example.com"]))
            .await
            .unwrap();
        service.generate_content(c.id).await.unwrap();

        let attachment = Attachment {
            filename: "flyer.pdf".into(),
            content: vec![1, 2, 3],
        };
        service
            .send_emails(c.id, vec![attachment.clone()])
            .await
            .unwrap();

        let sent = mailbox.sent();
        assert_eq!(sent[0].attachments, [attachment]);
        assert_eq!(sent[0].from, "owner@example.com");
        assert!(sent[0].body_html.as_deref().unwrap().contains("<h2>Big Savings Inside!!</h2>"));
    }

    #[tokio::test]
    async fn delete_unknown_recipient_is_not_found() {
        let (service, _, _) = service().await;
        assert!(matches!(
            service.delete_recipient(Uuid::new_v4()).await,
            Err(Error::Campaign(CampaignError::RecipientNotFound(_)))
        ));
    }
}
