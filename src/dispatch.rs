//! Request dispatch: validation, authorization, provider resolution, and
//! hand-off to the external task queue.
//!
//! The dispatcher is synchronous and fast. It never touches a provider
//! itself; by the time a judge call happens the original caller already
//! holds a task handle.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gateway::JudgeEndpoint;
use crate::pairing::{clamp_pairs_per_item, expected_comparison_count, DEFAULT_PAIRS_PER_ITEM};
use crate::pipeline::MAX_CALL_CONCURRENCY;
use crate::prompts::{RankingItem, RankingType, CUSTOM_INSTRUCTION_MAX_CHARS};
use crate::registry::{ProviderRegistry, RegistryError};

/// Rough wall-clock guess per judge round trip, for caller-facing estimates.
const EST_SECS_PER_CALL: u64 = 10;

// =============================================================================
// Collaborator seams
// =============================================================================

/// Permission check owned by the surrounding platform.
#[async_trait]
pub trait ProjectAuthorizer: Send + Sync {
    async fn is_teacher_or_above(&self, project_id: &str, user_email: &str) -> bool;
}

/// Handle returned by the durable queue at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub call_id: String,
}

/// The durable queue that will eventually run the job's pipeline.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn submit(&self, job: RankingJob) -> Result<TaskHandle, String>;
}

/// Audit trail, one entry per accepted request.
#[async_trait]
pub trait OperationLog: Send + Sync {
    async fn log_project_operation(
        &self,
        actor_email: &str,
        project_id: &str,
        event_name: &str,
        entity_type: &str,
        entity_id: &str,
        details: &str,
    );
}

// =============================================================================
// Job payloads
// =============================================================================

/// Fields every mode carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub project_id: String,
    pub stage_id: String,
    pub user_email: String,
    pub ranking_type: RankingType,
    pub items: Vec<RankingItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instruction: Option<String>,
}

/// Queue payload, one variant per mode so each carries only what it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RankingJob {
    Direct {
        #[serde(flatten)]
        context: JobContext,
        judge: JudgeEndpoint,
    },
    BradleyTerry {
        #[serde(flatten)]
        context: JobContext,
        judge: JudgeEndpoint,
        pairs_per_item: usize,
    },
    MultiAgent {
        #[serde(flatten)]
        context: JobContext,
        judges: Vec<JudgeEndpoint>,
    },
}

impl RankingJob {
    pub fn mode(&self) -> &'static str {
        match self {
            RankingJob::Direct { .. } => "direct",
            RankingJob::BradleyTerry { .. } => "bradley_terry",
            RankingJob::MultiAgent { .. } => "multi_agent",
        }
    }

    pub fn context(&self) -> &JobContext {
        match self {
            RankingJob::Direct { context, .. }
            | RankingJob::BradleyTerry { context, .. }
            | RankingJob::MultiAgent { context, .. } => context,
        }
    }
}

// =============================================================================
// Requests and responses
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RankingRequest {
    pub project_id: String,
    pub stage_id: String,
    pub user_email: String,
    pub ranking_type: RankingType,
    pub items: Vec<RankingItem>,
    /// One id for direct/BT mode, 2-5 for multi-agent.
    pub provider_ids: Vec<String>,
    #[serde(default)]
    pub custom_instruction: Option<String>,
    /// BT only; clamped to [2, 5], defaulting when absent.
    #[serde(default)]
    pub pairs_per_item: Option<usize>,
}

/// Synchronous success reply: the handle plus what the caller needs to
/// render a progress denominator before any judge call happens.
#[derive(Debug, Clone, Serialize)]
pub struct RankingAccepted {
    pub task_id: String,
    pub call_id: String,
    pub mode: &'static str,
    pub estimated_time_secs: u64,
    pub providers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_comparisons: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),
    #[error("user {user_email} is not teacher-or-above for project {project_id}")]
    AccessDenied {
        user_email: String,
        project_id: String,
    },
    #[error("unknown provider: {0}")]
    ProviderNotFound(String),
    #[error("provider is disabled: {0}")]
    ProviderDisabled(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    fn validation(msg: impl Into<String>) -> Self {
        DispatchError::Validation(msg.into())
    }

    /// Stable machine-readable code for the caller-facing error body.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::AccessDenied { .. } => "ACCESS_DENIED",
            DispatchError::ProviderNotFound(_) => "NOT_FOUND",
            DispatchError::ProviderDisabled(_) => "PROVIDER_DISABLED",
            DispatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => DispatchError::ProviderNotFound(id),
            RegistryError::Disabled(name) => DispatchError::ProviderDisabled(name),
            other => DispatchError::Internal(other.to_string()),
        }
    }
}

/// Wire shape for errors returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&DispatchError> for ErrorBody {
    fn from(err: &DispatchError) -> Self {
        ErrorBody {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    authorizer: Arc<dyn ProjectAuthorizer>,
    queue: Arc<dyn TaskQueue>,
    oplog: Arc<dyn OperationLog>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        authorizer: Arc<dyn ProjectAuthorizer>,
        queue: Arc<dyn TaskQueue>,
        oplog: Arc<dyn OperationLog>,
    ) -> Self {
        Self {
            registry,
            authorizer,
            queue,
            oplog,
        }
    }

    /// Single-call mode: one judge ranks every item at once.
    pub async fn submit_direct(
        &self,
        req: RankingRequest,
    ) -> Result<RankingAccepted, DispatchError> {
        self.validate_common(&req, 1)?;
        self.require_single_provider(&req)?;
        self.authorize(&req).await?;

        let judges = self.registry.snapshot(&req.provider_ids).await?;
        let judge = judges.into_iter().next().ok_or_else(|| {
            DispatchError::Internal("snapshot returned no endpoint".into())
        })?;
        let providers = vec![judge.name.clone()];

        let job = RankingJob::Direct {
            context: context_from(&req),
            judge,
        };
        let handle = self.enqueue(&req, job).await?;

        Ok(RankingAccepted {
            task_id: handle.task_id,
            call_id: handle.call_id,
            mode: "direct",
            estimated_time_secs: estimate_secs(1),
            providers,
            expected_comparisons: None,
        })
    }

    /// Pairwise mode: one judge, one call per generated comparison.
    pub async fn submit_bradley_terry(
        &self,
        req: RankingRequest,
    ) -> Result<RankingAccepted, DispatchError> {
        self.validate_common(&req, 2)?;
        self.require_single_provider(&req)?;
        self.authorize(&req).await?;

        let judges = self.registry.snapshot(&req.provider_ids).await?;
        let judge = judges.into_iter().next().ok_or_else(|| {
            DispatchError::Internal("snapshot returned no endpoint".into())
        })?;
        let providers = vec![judge.name.clone()];

        let pairs_per_item =
            clamp_pairs_per_item(req.pairs_per_item.unwrap_or(DEFAULT_PAIRS_PER_ITEM));
        let expected = expected_comparison_count(req.items.len(), pairs_per_item);

        let job = RankingJob::BradleyTerry {
            context: context_from(&req),
            judge,
            pairs_per_item,
        };
        let handle = self.enqueue(&req, job).await?;

        Ok(RankingAccepted {
            task_id: handle.task_id,
            call_id: handle.call_id,
            mode: "bradley_terry",
            estimated_time_secs: estimate_secs(expected),
            providers,
            expected_comparisons: Some(expected),
        })
    }

    /// Debate mode: 2-5 judges, two rounds.
    pub async fn submit_multi_agent(
        &self,
        req: RankingRequest,
    ) -> Result<RankingAccepted, DispatchError> {
        self.validate_common(&req, 1)?;
        let count = req.provider_ids.len();
        if !(2..=MAX_CALL_CONCURRENCY).contains(&count) {
            return Err(DispatchError::validation(format!(
                "multi-agent mode requires 2-{MAX_CALL_CONCURRENCY} providers, got {count}"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for id in &req.provider_ids {
            if !seen.insert(id.as_str()) {
                return Err(DispatchError::validation(format!(
                    "duplicate provider id: {id}"
                )));
            }
        }
        self.authorize(&req).await?;

        let judges = self.registry.snapshot(&req.provider_ids).await?;
        let providers: Vec<String> = judges.iter().map(|j| j.name.clone()).collect();
        let calls = 2 * judges.len();

        let job = RankingJob::MultiAgent {
            context: context_from(&req),
            judges,
        };
        let handle = self.enqueue(&req, job).await?;

        Ok(RankingAccepted {
            task_id: handle.task_id,
            call_id: handle.call_id,
            mode: "multi_agent",
            estimated_time_secs: estimate_secs(calls),
            providers,
            expected_comparisons: None,
        })
    }

    fn validate_common(&self, req: &RankingRequest, min_items: usize) -> Result<(), DispatchError> {
        if req.project_id.trim().is_empty() {
            return Err(DispatchError::validation("projectId is required"));
        }
        if req.stage_id.trim().is_empty() {
            return Err(DispatchError::validation("stageId is required"));
        }
        if req.user_email.trim().is_empty() {
            return Err(DispatchError::validation("userEmail is required"));
        }
        if req.provider_ids.is_empty() {
            return Err(DispatchError::validation(
                "at least one provider id is required",
            ));
        }
        if req.items.len() < min_items {
            return Err(DispatchError::validation(format!(
                "at least {min_items} item(s) required, got {}",
                req.items.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for item in &req.items {
            if item.id.trim().is_empty() {
                return Err(DispatchError::validation("item id must be non-empty"));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(DispatchError::validation(format!(
                    "duplicate item id: {}",
                    item.id
                )));
            }
        }
        if let Some(instruction) = &req.custom_instruction {
            if instruction.chars().count() > CUSTOM_INSTRUCTION_MAX_CHARS {
                return Err(DispatchError::validation(format!(
                    "custom instruction exceeds {CUSTOM_INSTRUCTION_MAX_CHARS} characters"
                )));
            }
        }
        Ok(())
    }

    fn require_single_provider(&self, req: &RankingRequest) -> Result<(), DispatchError> {
        if req.provider_ids.len() != 1 {
            return Err(DispatchError::validation(format!(
                "exactly one provider id required, got {}",
                req.provider_ids.len()
            )));
        }
        Ok(())
    }

    async fn authorize(&self, req: &RankingRequest) -> Result<(), DispatchError> {
        if !self
            .authorizer
            .is_teacher_or_above(&req.project_id, &req.user_email)
            .await
        {
            return Err(DispatchError::AccessDenied {
                user_email: req.user_email.clone(),
                project_id: req.project_id.clone(),
            });
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        req: &RankingRequest,
        job: RankingJob,
    ) -> Result<TaskHandle, DispatchError> {
        let mode = job.mode();
        let handle = self
            .queue
            .submit(job)
            .await
            .map_err(DispatchError::Internal)?;

        self.oplog
            .log_project_operation(
                &req.user_email,
                &req.project_id,
                "ai_ranking_requested",
                "stage",
                &req.stage_id,
                &format!(
                    "mode={mode} ranking_type={} items={} task={}",
                    req.ranking_type.as_str(),
                    req.items.len(),
                    handle.task_id
                ),
            )
            .await;

        info!(
            mode,
            project = %req.project_id,
            stage = %req.stage_id,
            items = req.items.len(),
            task = %handle.task_id,
            "ranking job queued"
        );
        Ok(handle)
    }
}

fn context_from(req: &RankingRequest) -> JobContext {
    JobContext {
        project_id: req.project_id.clone(),
        stage_id: req.stage_id.clone(),
        user_email: req.user_email.clone(),
        ranking_type: req.ranking_type,
        items: req.items.clone(),
        custom_instruction: req.custom_instruction.clone(),
    }
}

/// Caller-facing duration guess assuming judge calls run at the default
/// concurrency.
fn estimate_secs(calls: usize) -> u64 {
    let batches = calls.div_ceil(crate::pipeline::DEFAULT_CALL_CONCURRENCY).max(1);
    batches as u64 * EST_SECS_PER_CALL
}
