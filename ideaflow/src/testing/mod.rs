//! Testing utilities for ideaflow pipelines.
//!
//! This module provides:
//! - A scripted completion client replaying per-stage replies
//! - Canned stage outputs
//! - Assertions over run outcomes

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{assert_run_failed_at, assert_run_succeeded, assert_stage_status};
pub use mocks::{ScriptedCompletionClient, ScriptedReply};
