//! Scripted completion client for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::errors::{GatewayError, NetworkErrorKind};
use crate::gateway::{CompletionClient, CompletionRequest, CompletionResponse};

/// How long a [`ScriptedReply::Hang`] call sleeps.
const HANG: Duration = Duration::from_secs(24 * 60 * 60);

/// One scripted outcome of a completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Succeed with this text.
    Text(String),
    /// Fail with this HTTP status.
    Status(u16),
    /// Succeed with an empty body.
    Empty,
    /// Fail with a connection reset.
    Network,
    /// Never answer; the gateway's call timeout fires.
    Hang,
}

impl ScriptedReply {
    /// Creates a successful text reply.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<String, VecDeque<ScriptedReply>>,
    fallback: HashMap<String, ScriptedReply>,
    latency: HashMap<String, Duration>,
    calls: HashMap<String, usize>,
    requests: Vec<CompletionRequest>,
}

/// A [`CompletionClient`] that replays replies per call context.
///
/// Replies queued with [`reply`](Self::reply) are consumed in order; once a
/// context's queue is empty, its [`always`](Self::always) reply is repeated.
/// A call with nothing scripted fails with [`GatewayError::InvalidRequest`].
#[derive(Debug, Default)]
pub struct ScriptedCompletionClient {
    script: Mutex<Script>,
}

impl ScriptedCompletionClient {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one reply for `context`.
    pub fn reply(&self, context: &str, reply: ScriptedReply) {
        self.script
            .lock()
            .queued
            .entry(context.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Sets the reply used once the queue for `context` is empty.
    pub fn always(&self, context: &str, reply: ScriptedReply) {
        self.script.lock().fallback.insert(context.to_string(), reply);
    }

    /// Delays every answer for `context`.
    pub fn with_latency(&self, context: &str, latency: Duration) {
        self.script.lock().latency.insert(context.to_string(), latency);
    }

    /// Number of calls made with `context`.
    #[must_use]
    pub fn calls_for(&self, context: &str) -> usize {
        self.script.lock().calls.get(context).copied().unwrap_or(0)
    }

    /// Total number of calls.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.script.lock().requests.len()
    }

    /// Every request received, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.script.lock().requests.clone()
    }

    fn next(&self, request: &CompletionRequest) -> (Option<ScriptedReply>, Option<Duration>) {
        let context = request.context.clone().unwrap_or_default();
        let mut guard = self.script.lock();
        let script = &mut *guard;

        script.requests.push(request.clone());
        *script.calls.entry(context.clone()).or_default() += 1;

        let queued = script.queued.get_mut(&context).and_then(VecDeque::pop_front);
        let reply = queued.or_else(|| script.fallback.get(&context).cloned());
        (reply, script.latency.get(&context).copied())
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, GatewayError> {
        let (reply, latency) = self.next(request);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            Some(ScriptedReply::Text(content)) => Ok(CompletionResponse {
                content,
                total_tokens: Some(42),
                model: Some(request.model.clone()),
            }),
            Some(ScriptedReply::Status(status)) => {
                Err(GatewayError::http(status, format!("scripted status {status}")))
            }
            Some(ScriptedReply::Empty) => Ok(CompletionResponse::text("")),
            Some(ScriptedReply::Network) => Err(GatewayError::network(
                NetworkErrorKind::Reset,
                "connection reset by peer",
            )),
            Some(ScriptedReply::Hang) => {
                tokio::time::sleep(HANG).await;
                Err(GatewayError::Timeout(HANG))
            }
            None => Err(GatewayError::InvalidRequest(format!(
                "no scripted reply for context {:?}",
                request.context
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ChatMessage;

    fn request(context: &str) -> CompletionRequest {
        CompletionRequest {
            model: "test-model".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.0,
            max_tokens: 10,
            context: Some(context.into()),
        }
    }

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let client = ScriptedCompletionClient::new();
        client.reply("a", ScriptedReply::Status(503));
        client.always("a", ScriptedReply::text("ok"));

        let first = client.complete(&request("a")).await.unwrap_err();
        assert_eq!(first.status(), Some(503));
        assert_eq!(client.complete(&request("a")).await.unwrap().content, "ok");
        assert_eq!(client.complete(&request("a")).await.unwrap().content, "ok");
        assert_eq!(client.calls_for("a"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_context_fails() {
        let client = ScriptedCompletionClient::new();
        let err = client.complete(&request("b")).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        assert_eq!(client.total_calls(), 1);
        assert_eq!(client.requests()[0].context.as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let client = ScriptedCompletionClient::new();
        client.always("slow", ScriptedReply::Empty);
        client.with_latency("slow", Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let response = client.complete(&request("slow")).await.unwrap();
        assert!(response.content.is_empty());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
