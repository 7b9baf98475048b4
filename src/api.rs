//! REST endpoints for campaigns, recipients and replies.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::campaign::{CampaignService, NewCampaign, RecipientInput};
use crate::error::{CampaignError, DatabaseError, Error};
use crate::mail::Attachment;
use crate::replies::{ReplyReconciler, ReplyResponder};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CampaignService>,
    pub reconciler: Arc<ReplyReconciler>,
    pub responder: Arc<ReplyResponder>,
}

/// Build the Axum router with all campaign routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route("/api/campaigns/{id}", get(get_campaign))
        .route("/api/campaigns/{id}/recipients", get(list_recipients))
        .route(
            "/api/campaigns/{id}/import_recipients",
            post(import_recipients),
        )
        .route("/api/campaigns/{id}/generate_content", post(generate_content))
        .route("/api/campaigns/{id}/send_emails", post(send_emails))
        .route("/api/campaigns/{id}/preview", get(preview))
        .route("/api/campaigns/{id}/generate_and_send", post(generate_and_send))
        .route("/api/campaigns/{id}/reply_stats", get(reply_stats))
        .route("/api/campaigns/{id}/verify_replies", get(verify_replies))
        .route("/api/campaigns/{id}/process_replies", post(process_replies))
        .route("/api/recipients/{id}", delete(delete_recipient))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type Reply = (StatusCode, Json<Value>);

fn ok(value: Value) -> Reply {
    (StatusCode::OK, Json(value))
}

fn bad_request(message: &str) -> Reply {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
}

/// Map a service error onto an HTTP status.
fn error_reply(err: Error) -> Reply {
    let status = match &err {
        Error::Campaign(CampaignError::NotFound(_) | CampaignError::RecipientNotFound(_))
        | Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Campaign(CampaignError::Validation(_) | CampaignError::NotGenerated(_)) => {
            StatusCode::BAD_REQUEST
        }
        Error::Transport(_) | Error::Llm(_) => StatusCode::BAD_GATEWAY,
        Error::Config(_) | Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    }
    (
        status,
        Json(json!({"error": err.to_string(), "error_type": err.kind()})),
    )
}

fn respond<T: serde::Serialize>(result: crate::error::Result<T>) -> Reply {
    match result {
        Ok(value) => ok(json!(value)),
        Err(e) => error_reply(e),
    }
}

fn parse_id(id: &str) -> Result<Uuid, Reply> {
    Uuid::parse_str(id).map_err(|_| bad_request("Invalid ID"))
}

// ── Request bodies ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ImportRequest {
    recipients: Vec<RecipientInput>,
}

#[derive(Debug, Deserialize)]
struct AttachmentUpload {
    filename: String,
    /// Standard base64.
    content_base64: String,
}

#[derive(Debug, Default, Deserialize)]
struct SendRequest {
    #[serde(default)]
    attachments: Vec<AttachmentUpload>,
}

/// Attachments from an optional JSON body.
fn parse_attachments(body: &Bytes) -> Result<Vec<Attachment>, Reply> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let request: SendRequest = serde_json::from_slice(body)
        .map_err(|e| bad_request(&format!("Invalid request body: {e}")))?;
    request
        .attachments
        .into_iter()
        .map(|upload| -> Result<Attachment, Reply> {
            let content = STANDARD.decode(upload.content_base64.trim()).map_err(|e| {
                bad_request(&format!("Attachment {} is not base64: {e}", upload.filename))
            })?;
            Ok(Attachment {
                filename: upload.filename,
                content,
            })
        })
        .collect()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> Reply {
    ok(json!({
        "status": "ok",
        "service": "campaign-mailer"
    }))
}

// ── Campaigns ───────────────────────────────────────────────────────────

async fn list_campaigns(State(state): State<AppState>) -> Reply {
    respond(state.service.list_campaigns().await)
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(body): Json<NewCampaign>,
) -> Reply {
    match state.service.create_campaign(body).await {
        Ok(campaign) => (StatusCode::CREATED, Json(json!(campaign))),
        Err(e) => error_reply(e),
    }
}

async fn get_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    respond(state.service.get_campaign(id).await)
}

async fn list_recipients(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    respond(state.service.list_recipients(id).await)
}

async fn import_recipients(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ImportRequest>,
) -> Reply {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    respond(state.service.import_recipients(id, body.recipients).await)
}

async fn generate_content(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    respond(state.service.generate_content(id).await)
}

async fn preview(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    respond(state.service.preview(id).await)
}

async fn send_emails(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Reply {
    let (id, attachments) = match parse_id(&id).and_then(|id| Ok((id, parse_attachments(&body)?))) {
        Ok(parsed) => parsed,
        Err(reply) => return reply,
    };
    info!(campaign_id = %id, attachments = attachments.len(), "Send requested");
    respond(state.service.send_emails(id, attachments).await)
}

async fn generate_and_send(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Reply {
    let (id, attachments) = match parse_id(&id).and_then(|id| Ok((id, parse_attachments(&body)?))) {
        Ok(parsed) => parsed,
        Err(reply) => return reply,
    };
    match state.service.generate_and_send(id, attachments).await {
        Ok((email, summary)) => ok(json!({"email": email, "summary": summary})),
        Err(e) => error_reply(e),
    }
}

// ── Replies ─────────────────────────────────────────────────────────────

async fn reply_stats(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    respond(state.service.reply_stats(id).await)
}

async fn verify_replies(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    match state.reconciler.scan_for_replies(id).await {
        Ok(new_replies) => ok(json!({"new_replies": new_replies})),
        Err(e) => error_reply(e),
    }
}

async fn process_replies(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let new_replies = match state.reconciler.scan_for_replies(id).await {
        Ok(n) => n,
        Err(e) => return error_reply(e),
    };
    match state.responder.process_pending(id).await {
        Ok(summary) => ok(json!({"new_replies": new_replies, "summary": summary})),
        Err(e) => error_reply(e),
    }
}

// ── Recipients ──────────────────────────────────────────────────────────

async fn delete_recipient(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    match state.service.delete_recipient(id).await {
        Ok(()) => ok(json!({"status": "deleted"})),
        Err(e) => error_reply(e),
    }
}
