//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::campaign::model::{
    Campaign, EmailReply, GeneratedEmail, Recipient, ReplyStats, Tone,
};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and dry runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

const CAMPAIGN_COLUMNS: &str = "id, name, topic, details, tone, created_at";

const RECIPIENT_COLUMNS: &str = "id, campaign_id, email, name, is_sent, sent_at, sent_message_id";

const GENERATED_COLUMNS: &str = "campaign_id, subject, body_text, body_html, generated_at";

const REPLY_COLUMNS: &str = "id, campaign_id, recipient_id, original_message_id, reply_message_id, thread_id, sender, reply_content, processed, reply_sent, created_at, updated_at";

fn row_to_campaign(row: &libsql::Row) -> Result<Campaign, libsql::Error> {
    let id: String = row.get(0)?;
    let tone: String = row.get(4)?;
    let created: String = row.get(5)?;
    Ok(Campaign {
        id: parse_uuid(&id),
        name: row.get(1)?,
        topic: row.get(2)?,
        details: row.get(3)?,
        tone: tone.parse().unwrap_or(Tone::Professional),
        created_at: parse_datetime(&created),
    })
}

fn row_to_recipient(row: &libsql::Row) -> Result<Recipient, libsql::Error> {
    let id: String = row.get(0)?;
    let campaign_id: String = row.get(1)?;
    let is_sent: i64 = row.get(4)?;
    let sent_at: Option<String> = row.get(5).ok();
    Ok(Recipient {
        id: parse_uuid(&id),
        campaign_id: parse_uuid(&campaign_id),
        email: row.get(2)?,
        name: row.get(3)?,
        is_sent: is_sent != 0,
        sent_at: parse_optional_datetime(&sent_at),
        sent_message_id: row.get(6).ok(),
    })
}

fn row_to_generated(row: &libsql::Row) -> Result<GeneratedEmail, libsql::Error> {
    let campaign_id: String = row.get(0)?;
    let generated: String = row.get(4)?;
    Ok(GeneratedEmail {
        campaign_id: parse_uuid(&campaign_id),
        subject: row.get(1)?,
        body_text: row.get(2)?,
        body_html: row.get(3)?,
        generated_at: parse_datetime(&generated),
    })
}

fn row_to_reply(row: &libsql::Row) -> Result<EmailReply, libsql::Error> {
    let id: String = row.get(0)?;
    let campaign_id: String = row.get(1)?;
    let recipient_id: String = row.get(2)?;
    let processed: i64 = row.get(8)?;
    let reply_sent: i64 = row.get(9)?;
    let created: String = row.get(10)?;
    let updated: String = row.get(11)?;
    Ok(EmailReply {
        id: parse_uuid(&id),
        campaign_id: parse_uuid(&campaign_id),
        recipient_id: parse_uuid(&recipient_id),
        original_message_id: row.get(3)?,
        reply_message_id: row.get(4)?,
        thread_id: row.get(5)?,
        sender: row.get(6)?,
        reply_content: row.get(7)?,
        processed: processed != 0,
        reply_sent: reply_sent != 0,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Drain a result set through a row mapper, skipping rows that fail to map.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
    what: &str,
) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(Some(row)) = rows.next().await {
        match map(&row) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!("Skipping {what} row: {e}");
            }
        }
    }
    items
}

/// Read the first row of a result set through a row mapper.
async fn first_row<T>(
    mut rows: libsql::Rows,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
    op: &str,
) -> Result<Option<T>, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => map(&row)
            .map(Some)
            .map_err(|e| DatabaseError::Query(format!("{op}: row parse: {e}"))),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Campaigns ───────────────────────────────────────────────────

    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO campaigns (id, name, topic, details, tone, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    campaign.id.to_string(),
                    campaign.name.clone(),
                    campaign.topic.clone(),
                    campaign.details.clone(),
                    campaign.tone.as_str(),
                    campaign.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_campaign: {e}")))?;

        debug!(campaign_id = %campaign.id, "Campaign inserted into DB");
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_campaign: {e}")))?;
        first_row(rows, row_to_campaign, "get_campaign").await
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_campaigns: {e}")))?;
        Ok(collect_rows(rows, row_to_campaign, "campaign").await)
    }

    // ── Recipients ──────────────────────────────────────────────────

    async fn insert_recipient(&self, recipient: &Recipient) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO recipients (id, campaign_id, email, name, is_sent, sent_at, sent_message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    recipient.id.to_string(),
                    recipient.campaign_id.to_string(),
                    recipient.email.clone(),
                    recipient.name.clone(),
                    recipient.is_sent as i64,
                    opt_text_owned(recipient.sent_at.map(|t| t.to_rfc3339())),
                    opt_text_owned(recipient.sent_message_id.clone()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_recipient: {e}")))?;

        Ok(count > 0)
    }

    async fn get_recipient(&self, id: Uuid) -> Result<Option<Recipient>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {RECIPIENT_COLUMNS} FROM recipients WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_recipient: {e}")))?;
        first_row(rows, row_to_recipient, "get_recipient").await
    }

    async fn list_recipients(&self, campaign_id: Uuid) -> Result<Vec<Recipient>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM recipients WHERE campaign_id = ?1 ORDER BY email ASC"
                ),
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_recipients: {e}")))?;
        Ok(collect_rows(rows, row_to_recipient, "recipient").await)
    }

    async fn mark_recipient_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        message_id: &str,
    ) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE recipients SET is_sent = 1, sent_at = ?1, sent_message_id = ?2 WHERE id = ?3",
                params![sent_at.to_rfc3339(), message_id, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_recipient_sent: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "recipient".into(),
                id: id.to_string(),
            });
        }
        debug!(recipient_id = %id, "Recipient marked sent");
        Ok(())
    }

    async fn delete_recipient(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM recipients WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_recipient: {e}")))?;
        Ok(count > 0)
    }

    // ── Generated content ───────────────────────────────────────────

    async fn upsert_generated_email(&self, email: &GeneratedEmail) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO generated_emails (campaign_id, subject, body_text, body_html, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(campaign_id) DO UPDATE SET
                    subject = excluded.subject,
                    body_text = excluded.body_text,
                    body_html = excluded.body_html,
                    generated_at = excluded.generated_at",
                params![
                    email.campaign_id.to_string(),
                    email.subject.clone(),
                    email.body_text.clone(),
                    email.body_html.clone(),
                    email.generated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_generated_email: {e}")))?;

        debug!(campaign_id = %email.campaign_id, "Generated email stored");
        Ok(())
    }

    async fn get_generated_email(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<GeneratedEmail>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {GENERATED_COLUMNS} FROM generated_emails WHERE campaign_id = ?1"),
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_generated_email: {e}")))?;
        first_row(rows, row_to_generated, "get_generated_email").await
    }

    // ── Replies ─────────────────────────────────────────────────────

    async fn insert_reply(&self, reply: &EmailReply) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO email_replies ({REPLY_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    reply.id.to_string(),
                    reply.campaign_id.to_string(),
                    reply.recipient_id.to_string(),
                    reply.original_message_id.clone(),
                    reply.reply_message_id.clone(),
                    reply.thread_id.clone(),
                    reply.sender.clone(),
                    reply.reply_content.clone(),
                    reply.processed as i64,
                    reply.reply_sent as i64,
                    reply.created_at.to_rfc3339(),
                    reply.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint(format!(
                        "reply {} already recorded for campaign {}",
                        reply.reply_message_id, reply.campaign_id
                    ))
                } else {
                    DatabaseError::Query(format!("insert_reply: {e}"))
                }
            })?;

        debug!(reply_id = %reply.id, reply_message_id = %reply.reply_message_id, "Reply inserted into DB");
        Ok(())
    }

    async fn reply_exists(
        &self,
        campaign_id: Uuid,
        reply_message_id: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM email_replies WHERE campaign_id = ?1 AND reply_message_id = ?2",
                params![campaign_id.to_string(), reply_message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reply_exists: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count > 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("reply_exists: {e}"))),
        }
    }

    async fn get_reply(&self, id: Uuid) -> Result<Option<EmailReply>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {REPLY_COLUMNS} FROM email_replies WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_reply: {e}")))?;
        first_row(rows, row_to_reply, "get_reply").await
    }

    async fn list_replies(&self, campaign_id: Uuid) -> Result<Vec<EmailReply>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REPLY_COLUMNS} FROM email_replies WHERE campaign_id = ?1 ORDER BY created_at ASC"
                ),
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_replies: {e}")))?;
        Ok(collect_rows(rows, row_to_reply, "reply").await)
    }

    async fn list_pending_replies(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<EmailReply>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REPLY_COLUMNS} FROM email_replies WHERE campaign_id = ?1 AND processed = 0 ORDER BY created_at ASC"
                ),
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_replies: {e}")))?;
        Ok(collect_rows(rows, row_to_reply, "reply").await)
    }

    async fn mark_reply_sent(&self, id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE email_replies SET processed = 1, reply_sent = 1, updated_at = ?1 WHERE id = ?2",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_reply_sent: {e}")))?;

        debug!(reply_id = %id, "Reply marked sent");
        Ok(())
    }

    async fn mark_reply_processed(&self, id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE email_replies SET processed = 1, updated_at = ?1 WHERE id = ?2",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_reply_processed: {e}")))?;

        debug!(reply_id = %id, "Reply marked processed");
        Ok(())
    }

    async fn reply_stats(&self, campaign_id: Uuid) -> Result<ReplyStats, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT processed, reply_sent, COUNT(*) FROM email_replies
                 WHERE campaign_id = ?1 GROUP BY processed, reply_sent",
                params![campaign_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reply_stats: {e}")))?;

        let read = |e: libsql::Error| DatabaseError::Query(format!("reply_stats: {e}"));
        let mut stats = ReplyStats::default();
        while let Some(row) = rows.next().await.map_err(read)? {
            let processed: i64 = row.get(0).map_err(read)?;
            let reply_sent: i64 = row.get(1).map_err(read)?;
            let count = row.get::<i64>(2).map_err(read)? as u32;
            stats.total += count;
            match (processed != 0, reply_sent != 0) {
                (false, _) => stats.pending += count,
                (true, true) => stats.sent += count,
                (true, false) => stats.gave_up += count,
            }
        }
        Ok(stats)
    }
}
