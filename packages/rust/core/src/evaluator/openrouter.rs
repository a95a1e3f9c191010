//! LLM scoring over an OpenAI-compatible chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use curator_shared::{CuratorError, DimensionScores, Item, PlatformFitScores, Result};

use super::{
    Evaluator, ScreenResult, parse_dimension_scores, parse_platform_fit, parse_screen_results,
    prompts,
};

const SCREEN_MAX_TOKENS: u32 = 2000;
const DEEP_MAX_TOKENS: u32 = 600;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
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
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Scores items by prompting a chat model (OpenRouter by default).
pub struct OpenRouterEvaluator {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenRouterEvaluator {
    /// Build a client. `request_timeout` bounds each HTTP request.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CuratorError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| CuratorError::config(format!("invalid API key: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("curator"));
        Ok(headers)
    }

    /// Send one prompt and return the reply text.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: 0.0,
        };

        debug!(model = %self.model, "chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CuratorError::Timeout(format!("request to {url} timed out"))
                } else {
                    CuratorError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(300).collect();
            return Err(CuratorError::evaluation(format!(
                "OpenRouter API error ({status}): {preview}"
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| CuratorError::parse(format!("invalid chat completion body: {e}")))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CuratorError::evaluation("empty reply from model"))
    }
}

#[async_trait]
impl Evaluator for OpenRouterEvaluator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn screen_batch(&self, items: &[Item]) -> Result<Vec<ScreenResult>> {
        let reply = self
            .complete(&prompts::screening(items), SCREEN_MAX_TOKENS)
            .await?;
        parse_screen_results(&reply, items.len())
    }

    async fn score_item(&self, item: &Item) -> Result<DimensionScores> {
        let reply = self.complete(&prompts::deep(item), DEEP_MAX_TOKENS).await?;
        parse_dimension_scores(&reply)
    }

    async fn platform_fit(&self, item: &Item) -> Result<PlatformFitScores> {
        let reply = self
            .complete(&prompts::platform_fit(item), DEEP_MAX_TOKENS)
            .await?;
        parse_platform_fit(&reply)
    }
}
