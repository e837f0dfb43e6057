//! Completion client seam and the HTTP implementation.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::types::{ChatMessage, CompletionRequest, CompletionResponse};
use crate::config::ApiConfig;
use crate::errors::GatewayError;

/// Longest error body kept on [`GatewayError::Http`].
const MAX_ERROR_BODY: usize = 500;

/// A remote chat-completion service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Performs one completion call. No retries, no caching.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, GatewayError>;
}

/// OpenAI-compatible `/chat/completions` client over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCompletionClient {
    /// Creates a client with bearer authentication.
    pub fn new(api: &ApiConfig, timeout: Duration) -> Result<Self, GatewayError> {
        if api.api_key.trim().is_empty() {
            return Err(GatewayError::Config("API key is empty".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", api.api_key.trim()))
            .map_err(|_| GatewayError::Config("API key contains invalid header characters".into()))?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: Option<u32>,
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, GatewayError> {
        let body = ChatApiRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let response = self.client.post(self.chat_url()).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let body: String = text.chars().take(MAX_ERROR_BODY).collect();
            debug!(status = status.as_u16(), context = ?request.context, "completion request failed");
            return Err(GatewayError::http(status.as_u16(), body));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&text)
            .map_err(|e| GatewayError::MalformedResponse(format!("invalid JSON envelope: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(GatewayError::EmptyResponse);
        }

        Ok(CompletionResponse {
            content,
            total_tokens: parsed.usage.and_then(|u| u.total_tokens),
            model: parsed.model,
        })
    }
}
