//! AI call gateway.
//!
//! [`CompletionClient`] is the seam to the remote chat-completion service;
//! [`HttpCompletionClient`] implements it over HTTPS. [`AiGateway`] wraps a
//! client with the response cache, the retry/circuit-breaker executor and
//! chunking for oversized prompts.

mod ai_gateway;
mod chunking;
mod client;
mod types;

pub use ai_gateway::{AiGateway, GatewayReply};
pub use chunking::{merge_chunk_values, split_into_chunks};
pub use client::{CompletionClient, HttpCompletionClient};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, Role};

#[cfg(test)]
pub use client::MockCompletionClient;
