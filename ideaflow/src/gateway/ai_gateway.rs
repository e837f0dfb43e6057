//! The AI call gateway: cache, chunking, retries and circuit breaking
//! around a [`CompletionClient`].

use futures::future::try_join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::chunking::{merge_chunk_values, split_into_chunks};
use super::client::{CompletionClient, HttpCompletionClient};
use super::types::{ChatMessage, CompletionRequest};
use crate::cache::{cache_key, BoundedCache};
use crate::config::{ApiConfig, ChunkingConfig, IdeaflowConfig, RetrySettings};
use crate::errors::{GatewayError, IdeaflowError};
use crate::events::{names, EventSink, NoOpEventSink};
use crate::parser::RecoveryParser;
use crate::retry::{RetryExecutor, RetryOptions};

/// Context label used when the caller supplies none.
const DEFAULT_CONTEXT: &str = "gateway";

/// Raw reply text and whether it was served from the response cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    /// Reply text, or the merged JSON of a chunked call.
    pub text: String,
    /// True when no completion call was made.
    pub cached: bool,
}

/// Composes the response cache, the retry executor and the recovery parser
/// around the single outbound completion call.
///
/// One gateway is shared by every stage of a run (and across runs), so the
/// cache and the circuit map are shared too.
pub struct AiGateway {
    client: Arc<dyn CompletionClient>,
    cache: BoundedCache<String, String>,
    retry: RetryExecutor,
    parser: RecoveryParser,
    events: Arc<dyn EventSink>,
    api: ApiConfig,
    retry_settings: RetrySettings,
    chunking: ChunkingConfig,
    call_timeout: Duration,
}

impl std::fmt::Debug for AiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiGateway")
            .field("model", &self.api.model)
            .field("cache", &self.cache.stats())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl AiGateway {
    /// Creates a gateway over any completion client.
    #[must_use]
    pub fn new(config: &IdeaflowConfig, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            cache: BoundedCache::from_config(&config.cache),
            retry: RetryExecutor::new(config.circuit_breaker),
            parser: RecoveryParser::new(),
            events: Arc::new(NoOpEventSink),
            api: config.api.clone(),
            retry_settings: config.retry,
            chunking: config.chunking,
            call_timeout: config.pipeline.call_timeout,
        }
    }

    /// Creates a gateway backed by the HTTP client.
    pub fn from_config(config: &IdeaflowConfig) -> Result<Self, IdeaflowError> {
        config.validate()?;
        let client = HttpCompletionClient::new(&config.api, config.pipeline.call_timeout)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Routes gateway, retry, circuit and parser events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        let circuit_config = *self.retry.circuit_breaker().config();
        self.retry = RetryExecutor::new(circuit_config).with_events(Arc::clone(&events));
        self.parser = RecoveryParser::new().with_events(Arc::clone(&events));
        self.events = events;
        self
    }

    /// Returns the shared recovery parser.
    #[must_use]
    pub fn parser(&self) -> &RecoveryParser {
        &self.parser
    }

    /// Returns the response cache.
    #[must_use]
    pub fn cache(&self) -> &BoundedCache<String, String> {
        &self.cache
    }

    /// Returns the retry executor (and through it, the circuit breaker).
    #[must_use]
    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Sends `prompt` to the completion service and returns the raw text.
    ///
    /// With `use_cache`, a live cached reply for the same semantic request is
    /// returned without a call, and a fresh reply is cached. Prompts larger
    /// than the chunking threshold are split, sent per window, and merged
    /// into one JSON object.
    pub async fn call(
        &self,
        prompt: &str,
        system: Option<&str>,
        use_cache: bool,
        context: Option<&str>,
    ) -> Result<String, IdeaflowError> {
        self.call_detailed(prompt, system, use_cache, context)
            .await
            .map(|reply| reply.text)
    }

    /// Like [`AiGateway::call`], also reporting whether the reply came from
    /// the cache.
    pub async fn call_detailed(
        &self,
        prompt: &str,
        system: Option<&str>,
        use_cache: bool,
        context: Option<&str>,
    ) -> Result<GatewayReply, IdeaflowError> {
        let label = context.unwrap_or(DEFAULT_CONTEXT);
        let key = use_cache.then(|| cache_key(context, system, prompt));

        if let Some(key) = &key {
            if let Some(hit) = self.cache.get(key) {
                debug!(context = %label, "cache hit");
                self.events.emit(names::CACHE_HIT, Some(json!({ "context": label })));
                return Ok(GatewayReply { text: hit, cached: true });
            }
            self.events.emit(names::CACHE_MISS, Some(json!({ "context": label })));
        }

        let text = if prompt.len() > self.chunking.threshold_bytes {
            self.call_chunked(prompt, system, label).await?
        } else {
            self.call_single(prompt, system, label).await?
        };

        if let Some(key) = key {
            self.cache.set(key, text.clone());
        }
        Ok(GatewayReply { text, cached: false })
    }

    async fn call_single(
        &self,
        prompt: &str,
        system: Option<&str>,
        context: &str,
    ) -> Result<String, IdeaflowError> {
        let request = self.build_request(prompt, system, context);
        let options = RetryOptions::new(context, &self.retry_settings);
        let timeout = self.call_timeout;
        let client = &self.client;
        let request = &request;

        let response = self
            .retry
            .execute_with_circuit_breaker(
                move || async move {
                    let response = tokio::time::timeout(timeout, client.complete(request))
                        .await
                        .map_err(|_| GatewayError::Timeout(timeout))??;
                    if response.content.trim().is_empty() {
                        return Err(GatewayError::EmptyResponse);
                    }
                    Ok::<_, GatewayError>(response)
                },
                &options,
            )
            .await?;

        if let Some(tokens) = response.total_tokens {
            debug!(context = %context, tokens, "completion received");
        }
        Ok(response.content)
    }

    async fn call_chunked(
        &self,
        prompt: &str,
        system: Option<&str>,
        context: &str,
    ) -> Result<String, IdeaflowError> {
        let chunks = split_into_chunks(prompt, self.chunking.chunk_bytes, self.chunking.overlap_bytes);
        let total = chunks.len();
        info!(context = %context, chunks = total, bytes = prompt.len(), "prompt exceeds threshold, chunking");
        self.events.emit(
            names::GATEWAY_CHUNKED,
            Some(json!({
                "context": context,
                "chunks": total,
                "bytes": prompt.len(),
            })),
        );

        let calls = chunks.iter().enumerate().map(move |(i, chunk)| {
            let chunk_prompt = format!("[Part {} of {total}]\n{chunk}", i + 1);
            async move { self.call_single(&chunk_prompt, system, context).await }
        });
        let replies = try_join_all(calls).await?;

        let values: Vec<_> = replies
            .iter()
            .map(|reply| self.parser.parse_detailed(reply, None, Some(context)))
            .filter(|outcome| !outcome.is_fallback())
            .map(|outcome| outcome.value)
            .collect();
        if values.is_empty() {
            return Err(GatewayError::MalformedResponse(format!(
                "none of {total} chunk replies contained structured data"
            ))
            .into());
        }

        Ok(serde_json::to_string(&merge_chunk_values(values))?)
    }

    fn build_request(&self, prompt: &str, system: Option<&str>, context: &str) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        CompletionRequest {
            model: self.api.model.clone(),
            messages,
            temperature: self.api.temperature,
            max_tokens: self.api.max_tokens,
            context: Some(context.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::errors::RetryError;
    use crate::events::CollectingEventSink;
    use crate::gateway::client::MockCompletionClient;
    use crate::gateway::CompletionResponse;
    use crate::testing::{ScriptedCompletionClient, ScriptedReply};
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn config() -> IdeaflowConfig {
        IdeaflowConfig::new("sk-test").with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        })
    }

    fn gateway(client: Arc<ScriptedCompletionClient>) -> (AiGateway, Arc<CollectingEventSink>) {
        let events = Arc::new(CollectingEventSink::new());
        let gateway = AiGateway::new(&config(), client).with_events(events.clone());
        (gateway, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_call() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always("ctx", ScriptedReply::text("{\"a\": 1}"));
        let (gateway, events) = gateway(client.clone());

        let first = gateway.call("prompt", Some("sys"), true, Some("ctx")).await.unwrap();
        let second = gateway.call("prompt  ", Some("sys"), true, Some("ctx")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.calls_for("ctx"), 1);
        assert_eq!(events.count(names::CACHE_MISS), 1);
        assert_eq!(events.count(names::CACHE_HIT), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detailed_reply_flags_cache_hits() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always("ctx", ScriptedReply::text("{\"a\": 1}"));
        let (gateway, _) = gateway(client.clone());

        let fresh = gateway.call_detailed("prompt", None, true, Some("ctx")).await.unwrap();
        let cached = gateway.call_detailed("prompt", None, true, Some("ctx")).await.unwrap();
        let bypass = gateway.call_detailed("prompt", None, false, Some("ctx")).await.unwrap();

        assert!(!fresh.cached);
        assert!(cached.cached);
        assert!(!bypass.cached);
        assert_eq!(cached.text, fresh.text);
        assert_eq!(client.calls_for("ctx"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_bypass() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always("ctx", ScriptedReply::text("{\"a\": 1}"));
        let (gateway, events) = gateway(client.clone());

        gateway.call("prompt", None, false, Some("ctx")).await.unwrap();
        gateway.call("prompt", None, false, Some("ctx")).await.unwrap();

        assert_eq!(client.calls_for("ctx"), 2);
        assert!(gateway.cache().is_empty());
        assert!(events.events_of_type("cache.").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_reply_is_retried() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.reply("ctx", ScriptedReply::Empty);
        client.reply("ctx", ScriptedReply::text("{\"ok\": true}"));
        let (gateway, events) = gateway(client.clone());

        let text = gateway.call("p", None, true, Some("ctx")).await.unwrap();
        assert_eq!(text, "{\"ok\": true}");
        assert_eq!(client.calls_for("ctx"), 2);
        assert_eq!(events.count(names::RETRY_SCHEDULED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_status() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always("ctx", ScriptedReply::Status(503));
        let (gateway, _) = gateway(client.clone());

        let err = gateway.call("p", None, true, Some("ctx")).await.unwrap_err();
        match err {
            IdeaflowError::Retry(RetryError::Exhausted { attempts, ref source, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.status(), Some(503));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.calls_for("ctx"), 3);
        assert!(gateway.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.reply("ctx", ScriptedReply::Hang);
        client.reply("ctx", ScriptedReply::text("{\"late\": true}"));
        let (gateway, _) = gateway(client.clone());

        let text = gateway.call("p", None, true, Some("ctx")).await.unwrap();
        assert_eq!(text, "{\"late\": true}");
        assert_eq!(client.calls_for("ctx"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always("ctx", ScriptedReply::Status(500));
        let (gateway, events) = gateway(client.clone());

        for _ in 0..2 {
            assert!(gateway.call("p", None, false, Some("ctx")).await.is_err());
        }
        let calls_before = client.calls_for("ctx");

        let err = gateway.call("p", None, false, Some("ctx")).await.unwrap_err();
        assert!(matches!(err, IdeaflowError::Retry(RetryError::CircuitOpen { .. })));
        assert_eq!(client.calls_for("ctx"), calls_before);
        assert_eq!(events.count(names::CIRCUIT_OPENED), 1);
        assert_eq!(events.count(names::CIRCUIT_REJECTED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunked_call_merges_results() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.reply("big", ScriptedReply::text("{\"summary\": \"one\", \"features\": [\"a\"]}"));
        client.reply("big", ScriptedReply::text("```json\n{\"features\": [\"b\"],}\n```"));
        client.always("big", ScriptedReply::text("{\"summary\": \"last\"}"));
        let (gateway, events) = gateway(client.clone());

        let prompt = "word ".repeat(8 * 1024);
        let text = gateway.call(&prompt, None, true, Some("big")).await.unwrap();
        let merged: Value = serde_json::from_str(&text).unwrap();

        let calls = client.calls_for("big");
        assert!(calls >= 3, "calls: {calls}");
        assert_eq!(merged["summary"], "last");
        let features = merged["features"].as_array().unwrap();
        assert!(features.contains(&Value::from("a")));
        assert!(features.contains(&Value::from("b")));
        assert_eq!(events.count(names::GATEWAY_CHUNKED), 1);

        for request in client.requests() {
            assert!(request.prompt_text().starts_with("[Part "));
            assert!(request.prompt_text().len() <= 12 * 1024 + 32);
        }
    }

    #[tokio::test]
    async fn test_request_shape_with_mock_client() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete()
            .withf(|req: &CompletionRequest| {
                req.model == "gpt-4o-mini"
                    && req.system_text() == Some("system text")
                    && req.prompt_text() == "user text"
                    && req.context.as_deref() == Some("design")
            })
            .times(1)
            .returning(|_| Ok(CompletionResponse::text("{\"ok\": 1}")));

        let gateway = AiGateway::new(&config(), Arc::new(mock));
        let text = gateway
            .call("user text", Some("system text"), false, Some("design"))
            .await
            .unwrap();
        assert_eq!(text, "{\"ok\": 1}");
    }
}
