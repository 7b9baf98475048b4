//! Campaign Mailer: AI-written email campaigns with reply tracking and
//! automatic responses.

pub mod api;
pub mod campaign;
pub mod config;
pub mod error;
pub mod generator;
pub mod llm;
pub mod mail;
pub mod replies;
pub mod store;
