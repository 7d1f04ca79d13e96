use super::prompt::{parse_items, system_prompt, user_prompt};
use super::{ExtractionBackend, ExtractionError, ExtractionRequest, ExtractionResponse};
use crate::batch::TokenUsage;
use crate::config::types::BackendConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible chat completion endpoint
#[derive(Debug)]
pub struct HttpBackend {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            temperature: config.temperature,
            client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ExtractionBackend for HttpBackend {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResponse, ExtractionError> {
        let user = user_prompt(request);
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(request.kind),
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: self.temperature,
        };

        let mut call = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await?;
        if !response.status().is_success() {
            return Err(ExtractionError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let completion: CompletionResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExtractionError::Parse("reply has no content".to_string()))?;

        let items = parse_items(request.kind, &content, request.max_items)?;
        tracing::debug!(kind = %request.kind, items = items.len(), "Extraction reply parsed");

        Ok(ExtractionResponse {
            items,
            token_usage: completion.usage.unwrap_or_default(),
        })
    }
}
