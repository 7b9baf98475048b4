//! Campaigns: domain model and the send workflow.

pub mod model;
pub mod service;

pub use model::{Campaign, EmailReply, GeneratedEmail, Recipient, ReplyState, ReplyStats, Tone};
pub use service::{CampaignService, ImportSummary, NewCampaign, RecipientInput, SendSummary};
