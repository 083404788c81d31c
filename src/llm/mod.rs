//! LLM-facing half of the pipeline: prompt synthesis, transport with
//! retry and rate limiting, and response parsing.

pub mod client;
pub mod parse;
pub mod prompt;
pub mod prompts;
pub mod rate_limit;

pub use client::{LlmClient, LlmError, Provider};
pub use parse::{parse_fix_response, FixEdit, FixSuggestion};
pub use prompt::build_user_payload;
pub use rate_limit::RateLimiter;
