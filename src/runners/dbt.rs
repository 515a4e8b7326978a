//! Transformation jobs on a hosted dbt service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{CorrelationHandle, DbtJobStepConfig};

use super::{ExternalJob, PollOutcome, RemoteJobStatus, RunnerError, StepContext};

#[async_trait]
pub trait DbtClient: Send + Sync {
    async fn trigger_job(&self, service_id: i64, job_id: &str) -> Result<String, RunnerError>;

    async fn job_run_status(
        &self,
        service_id: i64,
        run_id: &str,
    ) -> Result<RemoteJobStatus, RunnerError>;

    async fn cancel_job_run(&self, service_id: i64, run_id: &str) -> Result<(), RunnerError>;
}

pub struct DbtJobRun {
    client: Arc<dyn DbtClient>,
    config: DbtJobStepConfig,
}

impl DbtJobRun {
    pub fn new(client: Arc<dyn DbtClient>, config: DbtJobStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ExternalJob for DbtJobRun {
    async fn start(&self, _ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let run_id = self
            .client
            .trigger_job(self.config.service_id, &self.config.job_id)
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
        "dbt job run"
    }
}
