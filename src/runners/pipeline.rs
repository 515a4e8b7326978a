//! Hosted data pipelines, started by name with the step's parameter bindings
//! passed through as pipeline parameters.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{CorrelationHandle, ParameterBindings, PipelineStepConfig};

use super::{ExternalJob, PollOutcome, RemoteJobStatus, RunnerError, StepContext};

#[async_trait]
pub trait PipelineClient: Send + Sync {
    async fn run_pipeline(
        &self,
        service_id: i64,
        pipeline_name: &str,
        bindings: &ParameterBindings,
    ) -> Result<String, RunnerError>;

    async fn pipeline_run_status(
        &self,
        service_id: i64,
        run_id: &str,
    ) -> Result<RemoteJobStatus, RunnerError>;

    async fn cancel_pipeline_run(&self, service_id: i64, run_id: &str)
        -> Result<(), RunnerError>;
}

pub struct PipelineRun {
    client: Arc<dyn PipelineClient>,
    config: PipelineStepConfig,
}

impl PipelineRun {
    pub fn new(client: Arc<dyn PipelineClient>, config: PipelineStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ExternalJob for PipelineRun {
    async fn start(&self, ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let run_id = self
            .client
            .run_pipeline(self.config.service_id, &self.config.pipeline_name, ctx.bindings)
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
            .pipeline_run_status(self.config.service_id, handle.as_str())
            .await?;
        Ok(status.into_poll_outcome())
    }

    async fn cancel(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        self.client
            .cancel_pipeline_run(self.config.service_id, handle.as_str())
            .await
    }

    fn describe(&self) -> &'static str {
        "pipeline run"
    }
}
