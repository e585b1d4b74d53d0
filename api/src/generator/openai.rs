use async_trait::async_trait;
use dbpulse_shared::SuggestionDraft;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{parse_suggestions, GenerationError, SuggestionContext, SuggestionGenerator};

const SYSTEM_PROMPT: &str = "You are a database performance optimization expert. \
    Provide specific, actionable suggestions based on the provided metrics.";
const TEMPERATURE: f32 = 0.7;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Chat-completions client for any OpenAI-compatible endpoint. The request is
/// bounded by a hard timeout; a timeout fails the attempt and is not retried
/// here.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SuggestionGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        context: &SuggestionContext,
    ) -> Result<Vec<SuggestionDraft>, GenerationError> {
        let api_key = self.api_key.as_ref().ok_or(GenerationError::NotConfigured)?;

        let prompt = context.to_prompt();
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: TEMPERATURE,
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "Calling suggestion generator");

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let payload: ChatResponse = response.json().await?;
        let content = payload
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| GenerationError::InvalidContent("response had no choices".to_string()))?;

        let drafts = parse_suggestions(content)?;
        info!(count = drafts.len(), "Generator returned suggestions");
        Ok(drafts)
    }
}
