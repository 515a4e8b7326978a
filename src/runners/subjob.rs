//! Sub-job steps: one job invoking another as a child execution of this same
//! engine.
//!
//! The template holds with the engine itself as the "external" system: start
//! creates and launches a child execution, the child's execution id is the
//! correlation handle, and (when waiting) poll reads the child's terminal
//! classification back out of the shared store. A parent stop is forwarded
//! to the child through the launcher.
//!
//! Two jobs in dependency-mode executions that invoke each other
//! synchronously can hold each other's gates open indefinitely; nothing in
//! this engine breaks that tie. Job graphs are expected to be acyclic at
//! authoring time.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::models::{CorrelationHandle, ExecutionOutcome, SubJobStepConfig};

use super::{
    ExternalJob, PollOutcome, RemoteOutcome, RunnerError, StepContext,
};

/// Contract with the component that owns execution creation and the
/// per-execution scheduler process.
#[async_trait]
pub trait ExecutorLauncher: Send + Sync {
    /// Mint a new execution of `job_id` and return its id.
    async fn create_execution(&self, job_id: i64) -> Result<i64, RunnerError>;

    /// Start the scheduler for an already-created execution.
    async fn start_executor(&self, execution_id: i64) -> Result<(), RunnerError>;

    /// Terminal classification of the execution, `None` while it still runs.
    async fn execution_outcome(
        &self,
        execution_id: i64,
    ) -> Result<Option<ExecutionOutcome>, RunnerError>;

    /// Request a stop of the execution on behalf of `actor`.
    async fn cancel_execution(&self, execution_id: i64, actor: &str) -> Result<(), RunnerError>;
}

pub struct SubJobRun {
    launcher: Arc<dyn ExecutorLauncher>,
    config: SubJobStepConfig,
}

impl SubJobRun {
    pub fn new(launcher: Arc<dyn ExecutorLauncher>, config: SubJobStepConfig) -> Self {
        Self { launcher, config }
    }

    fn execution_id(handle: &CorrelationHandle) -> Result<i64, RunnerError> {
        handle.as_str().parse().map_err(|_| {
            RunnerError::external(
                "sub-job",
                format!("correlation handle '{handle}' is not an execution id"),
            )
        })
    }
}

#[async_trait]
impl ExternalJob for SubJobRun {
    async fn start(&self, _ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let execution_id = self.launcher.create_execution(self.config.job_id).await?;
        self.launcher.start_executor(execution_id).await?;
        Ok(CorrelationHandle::new(execution_id.to_string()))
    }

    async fn poll(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<PollOutcome, RunnerError> {
        let execution_id = Self::execution_id(handle)?;

        // Fire-and-forget: launching the child is the whole unit of work.
        if !self.config.wait_for_completion {
            return Ok(PollOutcome::Terminal(RemoteOutcome::succeeded(Some(json!({
                "execution_id": execution_id,
            })))));
        }

        let outcome = match self.launcher.execution_outcome(execution_id).await? {
            None => return Ok(PollOutcome::Pending),
            Some(outcome) => outcome,
        };
        let output = Some(json!({ "execution_id": execution_id, "outcome": outcome.to_string() }));
        let remote = match outcome {
            ExecutionOutcome::Succeeded => RemoteOutcome::succeeded(output),
            ExecutionOutcome::Warning => {
                let mut remote = RemoteOutcome::succeeded(output);
                remote
                    .messages
                    .warning(format!("child execution {execution_id} finished with warnings"));
                remote
            }
            ExecutionOutcome::Failed => {
                RemoteOutcome::failed(format!("child execution {execution_id} failed"), output)
            }
            ExecutionOutcome::Stopped => {
                RemoteOutcome::failed(format!("child execution {execution_id} was stopped"), output)
            }
        };
        Ok(PollOutcome::Terminal(remote))
    }

    async fn cancel(
        &self,
        ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        let execution_id = Self::execution_id(handle)?;
        let actor = ctx.stop_actor().unwrap_or_else(|| "step timeout".to_string());
        self.launcher.cancel_execution(execution_id, &actor).await
    }

    fn describe(&self) -> &'static str {
        "sub-job execution"
    }
}
