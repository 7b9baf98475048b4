//! Reply handling: reconciliation of inbound mail to campaign recipients and
//! AI-drafted responses.

pub mod matching;
pub mod reconciler;
pub mod responder;

pub use reconciler::ReplyReconciler;
pub use responder::{ProcessSummary, ReplyOutcome, ReplyResponder, SkipReason};
