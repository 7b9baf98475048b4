//! Pure reconciliation heuristics: query building, sender normalization,
//! recipient matching and thread inspection.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::campaign::model::Recipient;
use crate::mail::{MailMessage, MessagePart};

static EMAIL_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email regex is valid")
});

/// Keep letters, digits and spaces so the subject can sit inside a quoted
/// search operator.
pub fn clean_subject(subject: &str) -> String {
    subject
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Inbox search for replies to a campaign subject, excluding the owner's
/// own messages.
///
/// `None` when nothing searchable is left of the subject; an empty
/// `subject:""` term would match every thread in the inbox.
pub fn build_search_query(subject: &str, owner: &str) -> Option<String> {
    let clean = clean_subject(subject);
    if clean.is_empty() {
        return None;
    }
    Some(format!(
        r#"in:inbox -from:{owner} (subject:"{clean}" OR subject:"Re: {clean}")"#
    ))
}

/// Bare lowercase address from a `From` header value.
///
/// `"Alice <Alice@Example.com>"` becomes `alice@example.com`. Without a
/// recognizable address the trimmed header itself is lowercased.
pub fn normalize_sender(header: &str) -> String {
    match EMAIL_ADDRESS.find(header) {
        Some(m) => m.as_str().to_lowercase(),
        None => header.trim().to_lowercase(),
    }
}

/// Find the campaign recipient a sender address belongs to.
///
/// An exact case-insensitive address match wins. Otherwise the first
/// recipient whose address contains the sender's local part is taken.
pub fn match_recipient<'a>(recipients: &'a [Recipient], sender: &str) -> Option<&'a Recipient> {
    let sender = sender.to_lowercase();

    if let Some(exact) = recipients
        .iter()
        .find(|r| r.email.eq_ignore_ascii_case(&sender))
    {
        return Some(exact);
    }

    let local = sender.split('@').next().unwrap_or_default();
    if local.is_empty() {
        return None;
    }
    recipients
        .iter()
        .find(|r| r.email.to_lowercase().contains(local))
}

/// Body of the first `text/plain` part, depth first. Empty if none.
pub fn extract_plain_text(part: &MessagePart) -> String {
    find_plain_text(part).unwrap_or_default().to_string()
}

fn find_plain_text(part: &MessagePart) -> Option<&str> {
    if part.mime_type.eq_ignore_ascii_case("text/plain")
        && let Some(body) = &part.body
    {
        return Some(body);
    }
    part.parts.iter().find_map(find_plain_text)
}

fn is_from(message: &MailMessage, owner: &str) -> bool {
    message
        .sender()
        .is_some_and(|s| normalize_sender(s) == owner.to_lowercase())
}

/// Pick the original campaign message and the reply to record from a thread.
///
/// The original is the message whose id is a tracked outbound id, or the
/// first message when none is tracked. The reply is the newest message that
/// is neither the original nor sent by `owner`. Threads with fewer than two
/// messages hold no reply.
pub fn select_original_and_reply<'a>(
    thread: &'a [MailMessage],
    owner: &str,
    tracked_ids: &HashSet<String>,
) -> Option<(&'a MailMessage, &'a MailMessage)> {
    if thread.len() < 2 {
        return None;
    }

    let original = thread
        .iter()
        .find(|m| tracked_ids.contains(&m.id))
        .or_else(|| thread.first())?;

    let reply = thread
        .iter()
        .rev()
        .find(|m| m.id != original.id && !is_from(m, owner))?;

    Some((original, reply))
}
