//! Runtime configuration.
//!
//! Every knob has a default except the API key. Values are read from
//! `IDEAFLOW_*` environment variables by [`IdeaflowConfig::from_env`]; tests
//! use [`IdeaflowConfig::from_lookup`] with a closure instead of mutating the
//! process environment.

use crate::errors::IdeaflowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "IDEAFLOW_API_KEY";
/// Environment variable overriding the API base URL.
pub const ENV_API_BASE_URL: &str = "IDEAFLOW_API_BASE_URL";
/// Environment variable overriding the model name.
pub const ENV_MODEL: &str = "IDEAFLOW_MODEL";
/// Environment variable overriding the per-call timeout, in seconds.
pub const ENV_TIMEOUT_SECONDS: &str = "IDEAFLOW_TIMEOUT_SECONDS";
/// Environment variable overriding the sampling temperature.
pub const ENV_TEMPERATURE: &str = "IDEAFLOW_TEMPERATURE";
/// Environment variable overriding the completion token limit.
pub const ENV_MAX_TOKENS: &str = "IDEAFLOW_MAX_TOKENS";

/// Remote completion service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bearer token sent with every request.
    #[serde(skip_serializing, default)]
    pub api_key: String,
    /// Base URL; `/chat/completions` is appended.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token limit.
    pub max_tokens: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
        }
    }
}

/// Backoff settings for gateway retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a probe.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry time-to-live.
    pub ttl: Duration,
    /// Maximum number of live entries.
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_size: 100,
        }
    }
}

/// Oversized prompt handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Prompts larger than this many bytes are chunked.
    pub threshold_bytes: usize,
    /// Size of each chunk window.
    pub chunk_bytes: usize,
    /// Bytes shared between consecutive windows.
    pub overlap_bytes: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 16 * 1024,
            chunk_bytes: 12 * 1024,
            overlap_bytes: 1024,
        }
    }
}

/// Orchestrator-level settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Deadline for a single gateway call.
    pub call_timeout: Duration,
    /// Deadline for a whole run.
    pub run_timeout: Duration,
    /// Aggregate quality score below which a deliverable is not accepted.
    pub min_quality_score: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_secs(600),
            min_quality_score: 40.0,
        }
    }
}

/// Aggregated configuration for a pipeline instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeaflowConfig {
    /// Completion service settings.
    pub api: ApiConfig,
    /// Retry settings.
    pub retry: RetrySettings,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Chunking settings.
    pub chunking: ChunkingConfig,
    /// Orchestrator settings.
    pub pipeline: PipelineSettings,
}

impl IdeaflowConfig {
    /// Creates a default configuration with the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.api.api_key = api_key.into();
        config
    }

    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, IdeaflowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IdeaflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| IdeaflowError::config(format!("{ENV_API_KEY} is not set")))?;

        let mut config = Self::new(api_key);

        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config.api.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            config.api.model = model.trim().to_string();
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_TIMEOUT_SECONDS)? {
            if secs == 0 {
                return Err(IdeaflowError::config(format!("{ENV_TIMEOUT_SECONDS} must be positive")));
            }
            config.pipeline.call_timeout = Duration::from_secs(secs);
        }
        if let Some(temperature) = parse_var::<f32>(&lookup, ENV_TEMPERATURE)? {
            config.api.temperature = temperature;
        }
        if let Some(max_tokens) = parse_var::<u32>(&lookup, ENV_MAX_TOKENS)? {
            config.api.max_tokens = max_tokens;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), IdeaflowError> {
        if self.api.api_key.trim().is_empty() {
            return Err(IdeaflowError::config("API key is empty"));
        }
        if self.retry.max_retries == 0 {
            return Err(IdeaflowError::config("max_retries must be at least 1"));
        }
        if self.cache.max_size == 0 {
            return Err(IdeaflowError::config("cache max_size must be at least 1"));
        }
        if self.chunking.overlap_bytes >= self.chunking.chunk_bytes {
            return Err(IdeaflowError::config("chunk overlap must be smaller than the chunk size"));
        }
        if !(0.0..=2.0).contains(&self.api.temperature) {
            return Err(IdeaflowError::config("temperature must be between 0 and 2"));
        }
        Ok(())
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api.base_url = url.into();
        self
    }

    /// Sets the retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the circuit breaker settings.
    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// Sets the cache settings.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the chunking settings.
    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Sets the orchestrator settings.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineSettings) -> Self {
        self.pipeline = pipeline;
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, IdeaflowError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| IdeaflowError::config(format!("{key} has an invalid value: {raw}"))),
    }
}
