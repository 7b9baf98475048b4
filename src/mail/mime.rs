//! RFC 5322 message assembly for outbound mail.

use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart};

use super::OutgoingEmail;
use crate::error::TransportError;

/// Content type for an attachment, inferred from its file extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" => "image/jpg",
        "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        "xls" | "xlsx" => "application/vnd.ms-excel",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

fn parse_mailbox(field: &str, value: &str) -> Result<Mailbox, TransportError> {
    value
        .parse()
        .map_err(|e| TransportError::Compose(format!("invalid {field} address '{value}': {e}")))
}

/// Build `multipart/mixed` holding `multipart/alternative(plain, html)`
/// followed by one part per attachment.
pub fn build_message(email: &OutgoingEmail) -> Result<Message, TransportError> {
    let html = email
        .body_html
        .clone()
        .unwrap_or_else(|| email.body_text.clone());

    let mut body = MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
        email.body_text.clone(),
        html,
    ));

    for attachment in &email.attachments {
        let content_type = ContentType::parse(content_type_for(&attachment.filename))
            .map_err(|e| TransportError::Compose(format!("content type: {e}")))?;
        body = body.singlepart(
            MimeAttachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), content_type),
        );
    }

    Message::builder()
        .from(parse_mailbox("from", &email.from)?)
        .to(parse_mailbox("to", &email.to)?)
        .subject(email.subject.clone())
        .multipart(body)
        .map_err(|e| TransportError::Compose(e.to_string()))
}

/// Serialized message bytes, ready for base64url encoding.
pub fn build_raw_message(email: &OutgoingEmail) -> Result<Vec<u8>, TransportError> {
    Ok(build_message(email)?.formatted())
}
