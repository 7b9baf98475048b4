//! Content generator: uses the LLM to write campaign emails and reply drafts.

use std::sync::Arc;

use tracing::{debug, info};

use crate::campaign::model::Tone;
use crate::config::GeneratorConfig;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Subject used when the model does not produce a `Subject:` line.
pub const DEFAULT_SUBJECT: &str = "Important Update";

/// What a campaign email should say.
#[derive(Debug, Clone)]
pub struct EmailBrief {
    pub purpose: String,
    pub key_points: Vec<String>,
    pub tone: Tone,
}

/// Parsed model output for a campaign email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftedEmail {
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
}

/// Inputs for drafting a response to a recipient's reply.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub campaign_name: String,
    pub original_body: String,
    pub reply_text: String,
    pub tone: Tone,
}

/// Writes campaign copy and reply drafts through an `LlmProvider`.
pub struct ContentGenerator {
    llm: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

impl ContentGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Generate subject and body for a campaign.
    pub async fn generate_email(&self, brief: &EmailBrief) -> Result<DraftedEmail, LlmError> {
        info!(tone = %brief.tone, key_points = brief.key_points.len(), "Generating campaign email");

        let mut system_prompt = String::from(
            "You are a professional email copywriter. Write one marketing email with:\n\
             - a compelling subject line under 60 characters\n\
             - an engaging body of 3-5 short paragraphs\n\
             - a clear call-to-action\n\n\
             Respond STRICTLY in this format and nothing else:\n\
             Subject: <subject line>\n\
             ---\n\
             <email body>",
        );
        if let Some(name) = &self.config.signature_name {
            system_prompt.push_str(&format!("\n\nSign the email as {name}."));
        }

        let key_points: String = brief
            .key_points
            .iter()
            .map(|kp| format!("- {kp}\n"))
            .collect();
        let user_prompt = format!(
            "Create a {tone} email about:\nPURPOSE: {purpose}\n\nKEY POINTS:\n{key_points}",
            tone = brief.tone,
            purpose = brief.purpose,
        );

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let response = self.llm.complete(request).await?;
        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost_usd = %self.llm.estimate_cost(&response),
            "Campaign email completion finished"
        );

        if response.content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty campaign email".into(),
            });
        }

        Ok(parse_draft(&response.content))
    }

    /// Draft a response to a recipient's reply. `None` means the model
    /// returned nothing usable.
    pub async fn draft_reply(&self, ctx: &ReplyContext) -> Result<Option<String>, LlmError> {
        let mut prompt = format!(
            "Campaign: {campaign}\n\
             Original Email: {original}\n\
             Received Reply: {reply}\n\n\
             Please compose a response that:\n\
             1. Acknowledges their reply\n\
             2. Addresses any questions or points they raised\n\
             3. Maintains a {tone} tone\n\
             4. Is concise (under {limit} words)\n\n\
             Only return the body of the response.",
            campaign = ctx.campaign_name,
            original = ctx.original_body,
            reply = ctx.reply_text,
            tone = ctx.tone,
            limit = self.config.reply_word_limit,
        );
        if let Some(name) = &self.config.signature_name {
            prompt.push_str(&format!("\nSign the response as {name}."));
        }

        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.reply_max_tokens);

        let response = self.llm.complete(request).await?;
        debug!(
            model = self.llm.model_name(),
            output_tokens = response.output_tokens,
            cost_usd = %self.llm.estimate_cost(&response),
            "Reply draft completion finished"
        );

        let draft = response.content.trim();
        if draft.is_empty() {
            return Ok(None);
        }
        Ok(Some(draft.to_string()))
    }
}

/// Split raw model output into subject and body and render the HTML body.
pub fn parse_draft(content: &str) -> DraftedEmail {
    let mut subject = String::new();
    let mut body_lines: Vec<&str> = Vec::new();

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line
            .get(..8)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("subject:"))
        {
            subject = line[8..].trim().to_string();
        } else if line != "---" {
            body_lines.push(line);
        }
    }

    if subject.is_empty() {
        subject = DEFAULT_SUBJECT.to_string();
    }

    let paragraphs: String = body_lines
        .iter()
        .map(|line| format!("<p>{}</p>", escape_html(line)))
        .collect();
    let body_html = format!(
        "<html><body><h2>{}</h2>{paragraphs}</body></html>",
        escape_html(&subject)
    );

    DraftedEmail {
        subject,
        body_text: body_lines.join("\n"),
        body_html,
    }
}

/// Minimal HTML escaping for text placed inside elements.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    use crate::llm::provider::CompletionResponse;

    /// Returns a canned completion and records the prompts it saw.
    struct StubLlm {
        reply: Result<String, ()>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl StubLlm {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

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
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().unwrap().push(request);
            match &self.reply {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                    input_tokens: 10,
                    output_tokens: 20,
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "stub".into(),
                    reason: "boom".into(),
                }),
            }
        }
    }

    fn generator(llm: Arc<StubLlm>) -> ContentGenerator {
        ContentGenerator::new(llm, GeneratorConfig::default())
    }

    #[test]
    fn parse_draft_extracts_subject_and_body() {
        let draft = parse_draft("Subject: Big Savings Inside!!\n---\nHello there\n\nShop now");
        assert_eq!(draft.subject, "Big Savings Inside!!");
        assert_eq!(draft.body_text, "Hello there\nShop now");
        assert_eq!(
            draft.body_html,
            "<html><body><h2>Big Savings Inside!!</h2><p>Hello there</p><p>Shop now</p></body></html>"
        );
    }

    #[test]
    fn parse_draft_subject_prefix_is_case_insensitive() {
        let draft = parse_draft("SUBJECT:  Hi  \nbody");
        assert_eq!(draft.subject, "Hi");
        assert_eq!(draft.body_text, "body");
    }

    #[test]
    fn parse_draft_defaults_subject() {
        let draft = parse_draft("Just a body line");
        assert_eq!(draft.subject, DEFAULT_SUBJECT);
        assert!(draft.body_html.contains("<h2>Important Update</h2>"));
    }

    #[test]
    fn parse_draft_escapes_html() {
        let draft = parse_draft("Subject: A & B\n<b>bold</b>");
        assert!(draft.body_html.contains("<h2>A &amp; B</h2>"));
        assert!(draft.body_html.contains("<p>&lt;b&gt;bold&lt;/b&gt;</p>"));
        assert_eq!(draft.body_text, "<b>bold</b>");
    }

    #[tokio::test]
    async fn generate_email_includes_brief_in_prompt() {
        let llm = StubLlm::answering("Subject: Spring\n---\nBody");
        let generator = generator(llm.clone());
        let brief = EmailBrief {
            purpose: "Seasonal discounts".into(),
            key_points: vec!["20% off".into(), "Free shipping".into()],
            tone: Tone::Friendly,
        };

        let draft = generator.generate_email(&brief).await.unwrap();
        assert_eq!(draft.subject, "Spring");

        let seen = llm.seen.lock().unwrap();
        let user = &seen[0].messages[1].content;
        assert!(user.contains("friendly"));
        assert!(user.contains("PURPOSE: Seasonal discounts"));
        assert!(user.contains("- Free shipping"));
    }

    #[tokio::test]
    async fn generate_email_empty_response_is_error() {
        let generator = generator(StubLlm::answering("   \n"));
        let brief = EmailBrief {
            purpose: "x".into(),
            key_points: vec![],
            tone: Tone::Professional,
        };
        let result = generator.generate_email(&brief).await;
        assert!(matches!(result, Err(LlmError::InvalidResponse { .. })));
    }

    fn reply_ctx() -> ReplyContext {
        ReplyContext {
            campaign_name: "Spring Sale".into(),
            original_body: "20% off everything".into(),
            reply_text: "Does it include shoes?".into(),
            tone: Tone::Urgent,
        }
    }

    #[tokio::test]
    async fn draft_reply_trims_output() {
        let llm = StubLlm::answering("  Yes, shoes too!  \n");
        let generator = generator(llm.clone());

        let draft = generator.draft_reply(&reply_ctx()).await.unwrap();
        assert_eq!(draft.as_deref(), Some("Yes, shoes too!"));

        let seen = llm.seen.lock().unwrap();
        let prompt = &seen[0].messages[0].content;
        assert!(prompt.contains("Campaign: Spring Sale"));
        assert!(prompt.contains("Received Reply: Does it include shoes?"));
        assert!(prompt.contains("urgent tone"));
        assert!(prompt.contains("under 150 words"));
    }

    #[tokio::test]
    async fn draft_reply_blank_is_none() {
        let generator = generator(StubLlm::answering(" \n\t"));
        assert!(generator.draft_reply(&reply_ctx()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn draft_reply_propagates_provider_error() {
        let generator = generator(StubLlm::failing());
        let result = generator.draft_reply(&reply_ctx()).await;
        assert!(matches!(result, Err(LlmError::RequestFailed { .. })));
    }
}
