//! Jobs defined on a compute cluster service, triggered by their remote job
//! id; a trigger yields a run id that is then polled.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ClusterJobStepConfig, CorrelationHandle, ParameterBindings};

use super::{ExternalJob, PollOutcome, RemoteJobStatus, RunnerError, StepContext};

#[async_trait]
pub trait ClusterJobClient: Send + Sync {
    async fn run_job_now(
        &self,
        service_id: i64,
        job_id: i64,
        bindings: &ParameterBindings,
    ) -> Result<String, RunnerError>;

    async fn job_run_status(
        &self,
        service_id: i64,
        run_id: &str,
    ) -> Result<RemoteJobStatus, RunnerError>;

    async fn cancel_job_run(&self, service_id: i64, run_id: &str) -> Result<(), RunnerError>;
}

pub struct ClusterJobRun {
    client: Arc<dyn ClusterJobClient>,
    config: ClusterJobStepConfig,
}

impl ClusterJobRun {
    pub fn new(client: Arc<dyn ClusterJobClient>, config: ClusterJobStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ExternalJob for ClusterJobRun {
    async fn start(&self, ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let run_id = self
            .client
            .run_job_now(self.config.service_id, self.config.job_id, ctx.bindings)
            .await?;
        Ok(CorrelationHandle::new(run_id))
    }

    async fn poll(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<PollOutcome, RunnerError> {
        let status = self
            .client
            .job_run_status(self.config.service_id, handle.as_str())
            .await?;
        Ok(status.into_poll_outcome())
    }

    async fn cancel(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        self.client
            .cancel_job_run(self.config.service_id, handle.as_str())
            .await
    }

    fn describe(&self) -> &'static str {
        "cluster job run"
    }
}
