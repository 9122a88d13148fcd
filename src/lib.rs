//! peerrank: LLM-judged ranking of peer-review items.
//!
//! Given a set of textual items (submissions or peer comments), produce a
//! total quality order plus a human-readable justification using one or
//! more LLM "judges" reached over OpenAI-compatible HTTP APIs.
//!
//! Three modes:
//! - **Direct**: one judge ranks all items in a single call.
//! - **Bradley-Terry**: one judge answers many pairwise comparisons; a
//!   Minorization-Maximization solver turns the outcomes into latent
//!   per-item strengths and a total order.
//! - **Multi-agent**: 2-5 judges rank independently, debate over a second
//!   round with each other's verdicts in view, and the final order is taken
//!   by rank aggregation.
//!
//! The crate splits along the queue boundary: [`dispatch`] is the fast
//! synchronous entry layer (validate, authorize, resolve providers, hand a
//! payload to the durable queue), while [`pipeline`] is what the queue
//! worker runs per job. Everything below those is a pure building block.

#![forbid(unsafe_code)]

pub mod bradley_terry;
pub mod dispatch;
pub mod gateway;
pub mod pairing;
pub mod pipeline;
pub mod prompts;
pub mod registry;
pub mod store;

pub use bradley_terry::{estimate_strengths, rank_by_strength, StrengthEstimate};
pub use dispatch::{
    DispatchError, Dispatcher, ErrorBody, JobContext, OperationLog, ProjectAuthorizer,
    RankingAccepted, RankingJob, RankingRequest, TaskHandle, TaskQueue,
};
pub use gateway::{
    GatewayError, JudgeEndpoint, OpenAiCompatAdapter, ProviderCapabilities, RankingReply,
};
pub use pairing::{expected_comparison_count, generate_comparisons, BtComparison};
pub use pipeline::{
    run_bradley_terry, run_direct, run_multi_agent, BtOutcome, DirectOutcome, JobSettings,
    MultiAgentOutcome, NoopProgressSink, PipelineError, ProgressSink, RankingJobInput,
};
pub use prompts::{AgentVerdict, ItemMetadata, RankingItem, RankingType};
pub use registry::{
    NewProvider, PromptOverrides, ProviderRegistry, ProviderSummary, ProviderUpdate,
};
pub use store::{ConfigStore, MemoryConfigStore, SqliteConfigStore};
