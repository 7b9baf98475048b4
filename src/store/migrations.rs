//! Schema migrations, tracked in a `_migrations` table.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version; append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                topic TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '',
                tone TEXT NOT NULL DEFAULT 'professional',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recipients (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                is_sent INTEGER NOT NULL DEFAULT 0,
                sent_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_recipients_campaign_email
                ON recipients(campaign_id, email COLLATE NOCASE);

            CREATE TABLE IF NOT EXISTS generated_emails (
                campaign_id TEXT PRIMARY KEY REFERENCES campaigns(id) ON DELETE CASCADE,
                subject TEXT NOT NULL,
                body_text TEXT NOT NULL,
                body_html TEXT NOT NULL,
                generated_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "reply_tracking",
        sql: r#"
            ALTER TABLE recipients ADD COLUMN sent_message_id TEXT;

            CREATE TABLE IF NOT EXISTS email_replies (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                recipient_id TEXT NOT NULL,
                original_message_id TEXT NOT NULL,
                reply_message_id TEXT NOT NULL,
                thread_id TEXT NOT NULL DEFAULT '',
                sender TEXT NOT NULL DEFAULT '',
                reply_content TEXT NOT NULL DEFAULT '',
                processed INTEGER NOT NULL DEFAULT 0,
                reply_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (campaign_id, reply_message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_email_replies_pending
                ON email_replies(campaign_id, processed);
        "#,
    },
];

/// Bring the schema up to the newest version.
///
/// Each step and its `_migrations` row commit together, so a failed step
/// leaves the database at the previous version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| migration_error("creating _migrations", e))?;

    let applied = applied_version(conn).await?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > applied);

    for step in pending {
        let label = format!("V{} {}", step.version, step.name);
        tracing::info!(version = step.version, name = step.name, "Applying migration");

        let tx = conn
            .transaction()
            .await
            .map_err(|e| migration_error(&label, e))?;
        tx.execute_batch(step.sql)
            .await
            .map_err(|e| migration_error(&label, e))?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![step.version, step.name],
        )
        .await
        .map_err(|e| migration_error(&label, e))?;
        tx.commit().await.map_err(|e| migration_error(&label, e))?;
    }

    let version = applied_version(conn).await?;
    tracing::debug!(version, "Schema up to date");
    Ok(())
}

async fn applied_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| migration_error("reading schema version", e))?;
    match rows
        .next()
        .await
        .map_err(|e| migration_error("reading schema version", e))?
    {
        Some(row) => row
            .get(0)
            .map_err(|e| migration_error("reading schema version", e)),
        None => Ok(0),
    }
}

fn migration_error(step: &str, err: libsql::Error) -> DatabaseError {
    DatabaseError::Migration(format!("{step}: {err}"))
}
