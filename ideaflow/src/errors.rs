//! Error types for the ideaflow pipeline.
//!
//! The taxonomy follows how failures are handled rather than where they
//! originate:
//!
//! - transient network and rate-limit/server failures are retried
//!   ([`GatewayError::is_retryable`]),
//! - malformed model output never surfaces here (the recovery parser absorbs it),
//! - configuration failures are fatal and raised before any stage runs,
//! - exhausted retries wrap the last underlying error with the attempt count
//!   and call context ([`RetryError`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors that can be classified as worth retrying.
///
/// The retry executor uses this as its default retry condition.
pub trait Retryable {
    /// Returns true if a later attempt of the same operation may succeed.
    fn is_retryable(&self) -> bool;
}

/// Transport-level failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// The connection could not be established.
    Connect,
    /// The peer reset or closed the connection mid-request.
    Reset,
    /// Name resolution failed.
    Dns,
    /// The transport gave up waiting.
    Timeout,
    /// Anything else reported by the transport.
    Other,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Reset => write!(f, "reset"),
            Self::Dns => write!(f, "dns"),
            Self::Timeout => write!(f, "timeout"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Errors raised by a single call to the remote completion service.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transport failure before a response was received.
    #[error("network error ({kind}): {message}")]
    Network {
        /// Failure category.
        kind: NetworkErrorKind,
        /// Transport message.
        message: String,
    },

    /// The call exceeded its per-call deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The service answered 2xx but without any completion text.
    #[error("completion service returned an empty response")]
    EmptyResponse,

    /// The response envelope could not be decoded.
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    /// The request was rejected locally before being sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client is misconfigured (missing key, bad header value).
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Creates a network error.
    #[must_use]
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    #[must_use]
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    /// Returns the HTTP status, if this error carries one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short error code for logs and events.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Http { status: 429, .. } => "rate_limited",
            Self::Http { status, .. } if *status >= 500 => "server_error",
            Self::Http { .. } => "http_error",
            Self::EmptyResponse => "empty_response",
            Self::MalformedResponse(_) => "malformed_response",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Config(_) => "config_error",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();

        let kind = if err.is_timeout() {
            NetworkErrorKind::Timeout
        } else if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
            NetworkErrorKind::Dns
        } else if lower.contains("reset") || lower.contains("broken pipe") {
            NetworkErrorKind::Reset
        } else if err.is_connect() {
            NetworkErrorKind::Connect
        } else if err.is_decode() {
            return Self::MalformedResponse(message);
        } else {
            NetworkErrorKind::Other
        };

        Self::Network { kind, message }
    }
}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network { kind, message } => match kind {
                NetworkErrorKind::Other => crate::retry::message_indicates_transient(message),
                _ => true,
            },
            Self::Timeout(_) | Self::EmptyResponse | Self::MalformedResponse(_) => true,
            Self::Http { status, .. } => crate::retry::is_retryable_status(*status),
            Self::InvalidRequest(_) | Self::Config(_) => false,
        }
    }
}

/// Failure of a retried (and possibly circuit-guarded) operation.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every allowed attempt failed with a retryable error.
    #[error("[{context}] failed after {attempts} attempt(s): {source}")]
    Exhausted {
        /// Caller-supplied call context.
        context: String,
        /// Attempts made.
        attempts: u32,
        /// The last underlying error.
        source: E,
    },

    /// The retry condition rejected the error.
    #[error("[{context}] non-retryable failure on attempt {attempts}: {source}")]
    NotRetryable {
        /// Caller-supplied call context.
        context: String,
        /// Attempts made.
        attempts: u32,
        /// The underlying error.
        source: E,
    },

    /// The circuit for this context is open; the operation was not invoked.
    #[error("[{context}] circuit open, retry after {retry_after:?}")]
    CircuitOpen {
        /// Caller-supplied call context.
        context: String,
        /// Time left until the circuit allows a probe.
        retry_after: Duration,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns the call context.
    #[must_use]
    pub fn context(&self) -> &str {
        match self {
            Self::Exhausted { context, .. }
            | Self::NotRetryable { context, .. }
            | Self::CircuitOpen { context, .. } => context,
        }
    }

    /// Returns how many times the operation was invoked.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::NotRetryable { attempts, .. } => *attempts,
            Self::CircuitOpen { .. } => 0,
        }
    }

    /// Returns the last underlying error, if the operation ran at all.
    #[must_use]
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } | Self::NotRetryable { source, .. } => Some(source),
            Self::CircuitOpen { .. } => None,
        }
    }

    /// Returns true if the circuit breaker rejected the call.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// The main error type for ideaflow operations.
#[derive(Debug, Error)]
pub enum IdeaflowError {
    /// Missing or invalid configuration. Fatal, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single gateway call failed without going through the retry wrapper.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A gateway call failed after the retry wrapper gave up.
    #[error(transparent)]
    Retry(#[from] RetryError<GatewayError>),

    /// A stage could not produce a result.
    #[error("stage '{stage}' failed: {message}")]
    Stage {
        /// Stage name.
        stage: String,
        /// Failure description.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IdeaflowError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a stage error.
    #[must_use]
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Returns the underlying gateway error, looking through retry wrapping.
    #[must_use]
    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            Self::Gateway(e) => Some(e),
            Self::Retry(e) => e.last_error(),
            _ => None,
        }
    }

    /// Buckets the error into the categories surfaced to end users.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Config(_) => FailureKind::Configuration,
            Self::Retry(RetryError::CircuitOpen { .. }) => FailureKind::ServiceUnavailable,
            Self::Serialization(_) => FailureKind::MalformedOutput,
            Self::Stage { .. } => FailureKind::Internal,
            Self::Gateway(_) | Self::Retry(_) => match self.gateway_error() {
                Some(GatewayError::Http { status: 429, .. }) => FailureKind::RateLimited,
                Some(GatewayError::Http { status, .. }) if *status >= 500 => {
                    FailureKind::ServiceUnavailable
                }
                Some(GatewayError::Timeout(_)) => FailureKind::Timeout,
                Some(GatewayError::Network { kind: NetworkErrorKind::Timeout, .. }) => {
                    FailureKind::Timeout
                }
                Some(GatewayError::Network { .. }) => FailureKind::Network,
                Some(GatewayError::EmptyResponse | GatewayError::MalformedResponse(_)) => {
                    FailureKind::MalformedOutput
                }
                Some(GatewayError::Config(_)) => FailureKind::Configuration,
                _ => FailureKind::Internal,
            },
        }
    }
}

/// User-facing failure categories, each with a localised message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Credentials or settings are missing.
    Configuration,
    /// The network path to the service failed.
    Network,
    /// The service kept rejecting requests with 429.
    RateLimited,
    /// The service is failing or its circuit is open.
    ServiceUnavailable,
    /// The call or the run exceeded its deadline.
    Timeout,
    /// The service kept returning unusable output.
    MalformedOutput,
    /// Anything else.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Network => write!(f, "network"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::ServiceUnavailable => write!(f, "service_unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::MalformedOutput => write!(f, "malformed_output"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
