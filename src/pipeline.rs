//! Per-job ranking pipelines.
//!
//! The queue worker invokes exactly one of these per accepted job. Each
//! pipeline is a pure async function over a configuration snapshot: no
//! shared mutable state, every judge call independently timeout-bounded,
//! sibling calls never aborted by a single failure.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::bradley_terry::{estimate_strengths, rank_by_strength};
use crate::gateway::{GatewayError, JudgeEndpoint, OpenAiCompatAdapter, DEFAULT_CALL_TIMEOUT};
use crate::pairing::{generate_comparisons, BtComparison};
use crate::prompts::{
    build_debate_user_prompt, build_system_prompt, build_user_prompt, AgentVerdict, RankingItem,
    RankingType,
};
use crate::registry::PromptOverrides;

/// Concurrency ceiling for in-flight judge calls within one job.
pub const MAX_CALL_CONCURRENCY: usize = 5;
pub const DEFAULT_CALL_CONCURRENCY: usize = 4;

/// Debate rounds in multi-agent mode.
const DEBATE_ROUNDS: usize = 2;

// =============================================================================
// Error type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("invalid ranking from {provider}: {message}")]
    InvalidRanking { provider: String, message: String },
    #[error("all judges failed: {0}")]
    AllJudgesFailed(String),
    #[error("invalid job: {0}")]
    InvalidJob(String),
}

// =============================================================================
// Hooks
// =============================================================================

/// Per-call completion hook. The queue worker forwards these over its push
/// channel; the pipeline only produces the numbers.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, completed: usize, total: usize);
}

/// Sink that discards progress.
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn on_progress(&self, _completed: usize, _total: usize) {}
}

// =============================================================================
// Job input
// =============================================================================

/// Mode-independent job payload fields.
#[derive(Debug, Clone)]
pub struct RankingJobInput {
    pub ranking_type: RankingType,
    pub items: Vec<RankingItem>,
    pub custom_instruction: Option<String>,
    pub prompt_overrides: PromptOverrides,
}

impl RankingJobInput {
    fn system_prompt(&self) -> String {
        build_system_prompt(
            self.ranking_type,
            &self.prompt_overrides.submission_prompt,
            &self.prompt_overrides.comment_prompt,
            self.custom_instruction.as_deref(),
        )
    }

    fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }
}

/// Per-job execution knobs.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Deadline for each individual judge call.
    pub call_timeout: Duration,
    /// In-flight call ceiling, clamped to [1, MAX_CALL_CONCURRENCY].
    pub concurrency: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            concurrency: DEFAULT_CALL_CONCURRENCY,
        }
    }
}

impl JobSettings {
    fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CALL_CONCURRENCY)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone)]
pub struct DirectOutcome {
    pub ranking: Vec<String>,
    pub reason: String,
    pub thinking_process: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BtOutcome {
    pub ranking: Vec<String>,
    /// Item id -> median-centered log strength.
    pub log_strengths: HashMap<String, f64>,
    /// The full plan, with winners/reasons filled where a judgment succeeded.
    pub comparisons: Vec<BtComparison>,
    pub failed_comparisons: usize,
    /// Items that ended up with zero valid comparisons.
    pub low_confidence: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct MultiAgentOutcome {
    pub ranking: Vec<String>,
    pub reason: String,
    pub round_one: Vec<AgentVerdict>,
    pub round_two: Vec<AgentVerdict>,
}

/// Check that `ranking` is exactly a permutation of the input id set.
fn validate_permutation(expected: &[String], ranking: &[String]) -> Result<(), String> {
    if ranking.len() != expected.len() {
        return Err(format!(
            "expected {} ids, got {}",
            expected.len(),
            ranking.len()
        ));
    }
    let expected_set: HashSet<&str> = expected.iter().map(|s| s.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    for id in ranking {
        if !expected_set.contains(id.as_str()) {
            return Err(format!("unknown id in ranking: {id}"));
        }
        if !seen.insert(id.as_str()) {
            return Err(format!("duplicate id in ranking: {id}"));
        }
    }
    Ok(())
}

// =============================================================================
// Direct mode
// =============================================================================

/// One judge, one call, all items at once.
pub async fn run_direct(
    adapter: &OpenAiCompatAdapter,
    endpoint: &JudgeEndpoint,
    input: &RankingJobInput,
    settings: &JobSettings,
    progress: &dyn ProgressSink,
) -> Result<DirectOutcome, PipelineError> {
    if input.items.is_empty() {
        return Err(PipelineError::InvalidJob("no items to rank".into()));
    }

    let system = input.system_prompt();
    let user = build_user_prompt(&input.items);
    let reply = adapter
        .rank(endpoint, &system, &user, settings.call_timeout)
        .await?;
    progress.on_progress(1, 1).await;

    let expected = input.item_ids();
    validate_permutation(&expected, &reply.ranking).map_err(|message| {
        PipelineError::InvalidRanking {
            provider: endpoint.name.clone(),
            message,
        }
    })?;

    info!(provider = %endpoint.name, items = expected.len(), "direct ranking complete");

    Ok(DirectOutcome {
        ranking: reply.ranking,
        reason: reply.reason,
        thinking_process: reply.thinking_process,
    })
}

// =============================================================================
// Bradley-Terry mode
// =============================================================================

/// One judge call per planned comparison, executed concurrently up to the
/// job's ceiling; failed calls leave their comparison winnerless and the
/// estimator works off whatever completed.
pub async fn run_bradley_terry(
    adapter: &OpenAiCompatAdapter,
    endpoint: &JudgeEndpoint,
    input: &RankingJobInput,
    pairs_per_item: usize,
    settings: &JobSettings,
    progress: &dyn ProgressSink,
) -> Result<BtOutcome, PipelineError> {
    if input.items.len() < 2 {
        return Err(PipelineError::InvalidJob(
            "bradley-terry mode needs at least 2 items".into(),
        ));
    }

    let item_ids = input.item_ids();
    let by_id: HashMap<&str, &RankingItem> =
        input.items.iter().map(|i| (i.id.as_str(), i)).collect();

    let mut plan = generate_comparisons(&item_ids, pairs_per_item);
    let total = plan.len();
    let system = input.system_prompt();

    let tasks: Vec<(usize, RankingItem, RankingItem)> = plan
        .iter()
        .map(|comp| {
            (
                comp.index,
                by_id[comp.item_a.as_str()].clone(),
                by_id[comp.item_b.as_str()].clone(),
            )
        })
        .collect();

    let system = &system;
    let calls = tasks.into_iter().map(|(index, a, b)| async move {
        let pair_expected = [a.id.clone(), b.id.clone()];
        let user = build_user_prompt(&[a, b]);
        let result = adapter
            .rank(endpoint, system, &user, settings.call_timeout)
            .await;
        (index, pair_expected, result)
    });

    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut results = stream::iter(calls).buffer_unordered(settings.effective_concurrency());

    while let Some((index, pair_expected, result)) = results.next().await {
        completed += 1;
        progress.on_progress(completed, total).await;

        let slot = &mut plan[index - 1];
        match result {
            Ok(reply) => match validate_permutation(&pair_expected, &reply.ranking) {
                Ok(()) => {
                    slot.winner = Some(reply.ranking[0].clone());
                    slot.reason = Some(reply.reason);
                }
                Err(message) => {
                    warn!(comparison = index, %message, "judge returned invalid pair ranking");
                    failed += 1;
                }
            },
            Err(err) => {
                warn!(comparison = index, code = err.code(), error = %err, "comparison failed");
                failed += 1;
            }
        }
    }
    drop(results);

    let estimate = estimate_strengths(&item_ids, &plan);
    let ranking = rank_by_strength(&item_ids, &estimate.log_strengths);

    let used = total - failed;
    let reason = format!(
        "Bradley-Terry ranking of {} items from {used} of {total} pairwise judgments by {}.",
        item_ids.len(),
        endpoint.name
    );

    info!(
        provider = %endpoint.name,
        comparisons = total,
        failed,
        converged = estimate.converged,
        "bradley-terry ranking complete"
    );

    Ok(BtOutcome {
        ranking,
        log_strengths: estimate.log_strengths,
        comparisons: plan,
        failed_comparisons: failed,
        low_confidence: estimate.low_confidence,
        reason,
    })
}

// =============================================================================
// Multi-agent mode
// =============================================================================

/// Independent verdicts from 2-5 judges, reconciled over a second debate
/// round, with the final order taken by rank aggregation of the last round.
pub async fn run_multi_agent(
    adapter: &OpenAiCompatAdapter,
    endpoints: &[JudgeEndpoint],
    input: &RankingJobInput,
    settings: &JobSettings,
    progress: &dyn ProgressSink,
) -> Result<MultiAgentOutcome, PipelineError> {
    if !(2..=MAX_CALL_CONCURRENCY).contains(&endpoints.len()) {
        return Err(PipelineError::InvalidJob(format!(
            "multi-agent mode needs 2-{MAX_CALL_CONCURRENCY} judges, got {}",
            endpoints.len()
        )));
    }
    if input.items.is_empty() {
        return Err(PipelineError::InvalidJob("no items to rank".into()));
    }

    let expected = input.item_ids();
    let system = input.system_prompt();
    let total_calls = DEBATE_ROUNDS * endpoints.len();
    let mut completed = 0usize;

    // Round one: fully independent verdicts.
    let user = build_user_prompt(&input.items);
    let round_one = run_round(
        adapter,
        endpoints,
        &system,
        |_| user.clone(),
        &expected,
        settings,
        progress,
        total_calls,
        &mut completed,
    )
    .await;

    if round_one.is_empty() {
        return Err(PipelineError::AllJudgesFailed(
            "no judge produced a valid round-one verdict".into(),
        ));
    }

    // Round two: each surviving judge sees its peers' positions.
    let survivors: Vec<JudgeEndpoint> = endpoints
        .iter()
        .filter(|e| round_one.iter().any(|(id, _)| id == &e.id))
        .cloned()
        .collect();
    let verdicts_one: Vec<AgentVerdict> = round_one.iter().map(|(_, v)| v.clone()).collect();

    let round_two = run_round(
        adapter,
        &survivors,
        &system,
        |endpoint| {
            let peers: Vec<AgentVerdict> = round_one
                .iter()
                .filter(|(id, _)| id != &endpoint.id)
                .map(|(_, v)| v.clone())
                .collect();
            build_debate_user_prompt(&input.items, &peers)
        },
        &expected,
        settings,
        progress,
        total_calls,
        &mut completed,
    )
    .await;

    let verdicts_two: Vec<AgentVerdict> = round_two.iter().map(|(_, v)| v.clone()).collect();

    // Judges that failed round two keep their round-one position out of the
    // final tally; aggregation runs over the last completed round.
    let final_verdicts = if verdicts_two.is_empty() {
        warn!("all judges failed round two; aggregating round-one verdicts");
        &verdicts_one
    } else {
        &verdicts_two
    };

    let ranking = aggregate_rankings(&expected, final_verdicts);
    let reason = summarize_debate(final_verdicts);

    info!(
        judges = endpoints.len(),
        survivors = final_verdicts.len(),
        "multi-agent ranking complete"
    );

    Ok(MultiAgentOutcome {
        ranking,
        reason,
        round_one: verdicts_one,
        round_two: verdicts_two,
    })
}

/// Execute one debate round concurrently; invalid or failed verdicts are
/// dropped with a warning, never fatal to siblings.
#[allow(clippy::too_many_arguments)]
async fn run_round<F>(
    adapter: &OpenAiCompatAdapter,
    endpoints: &[JudgeEndpoint],
    system: &str,
    user_for: F,
    expected: &[String],
    settings: &JobSettings,
    progress: &dyn ProgressSink,
    total_calls: usize,
    completed: &mut usize,
) -> Vec<(String, AgentVerdict)>
where
    F: Fn(&JudgeEndpoint) -> String,
{
    let calls = endpoints.iter().map(|endpoint| {
        let user = user_for(endpoint);
        async move {
            let result = adapter
                .rank(endpoint, system, &user, settings.call_timeout)
                .await;
            (endpoint, result)
        }
    });

    let concurrency = settings.effective_concurrency().min(endpoints.len().max(1));
    let mut results = stream::iter(calls).buffer_unordered(concurrency);

    let mut verdicts = Vec::with_capacity(endpoints.len());
    while let Some((endpoint, result)) = results.next().await {
        *completed += 1;
        progress.on_progress(*completed, total_calls).await;

        match result {
            Ok(reply) => match validate_permutation(expected, &reply.ranking) {
                Ok(()) => verdicts.push((
                    endpoint.id.clone(),
                    AgentVerdict {
                        provider_name: endpoint.name.clone(),
                        reason: reply.reason,
                        ranking: reply.ranking,
                    },
                )),
                Err(message) => {
                    warn!(provider = %endpoint.name, %message, "dropping invalid verdict");
                }
            },
            Err(err) => {
                warn!(provider = %endpoint.name, code = err.code(), error = %err, "judge failed round");
            }
        }
    }

    // Deterministic order for prompts and outputs regardless of completion order.
    verdicts.sort_by_key(|(id, _)| {
        endpoints
            .iter()
            .position(|e| &e.id == id)
            .unwrap_or(endpoints.len())
    });
    verdicts
}

/// Borda-style rank aggregation: an item earns n-1 points for first place
/// down to 0 for last, summed across verdicts; ties break by input order.
fn aggregate_rankings(expected: &[String], verdicts: &[AgentVerdict]) -> Vec<String> {
    let n = expected.len();
    let mut scores: HashMap<&str, usize> = expected.iter().map(|id| (id.as_str(), 0)).collect();
    for verdict in verdicts {
        for (pos, id) in verdict.ranking.iter().enumerate() {
            if let Some(score) = scores.get_mut(id.as_str()) {
                *score += n - 1 - pos;
            }
        }
    }

    let mut order: Vec<String> = expected.to_vec();
    order.sort_by(|a, b| scores[b.as_str()].cmp(&scores[a.as_str()]));
    order
}

fn summarize_debate(verdicts: &[AgentVerdict]) -> String {
    let mut out = format!(
        "Consensus of {} judges after a two-round debate.",
        verdicts.len()
    );
    for v in verdicts {
        out.push_str(&format!("\n{}: {}", v.provider_name, v.reason));
    }
    out
}
