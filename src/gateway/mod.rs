//! Judge gateway for OpenAI-compatible chat completions.

pub mod error;
pub mod openai;
pub mod types;

pub use error::GatewayError;
pub use openai::{OpenAiCompatAdapter, DEFAULT_CALL_TIMEOUT};
pub use types::{parse_ranking_reply, JudgeEndpoint, ProviderCapabilities, RankingReply};
