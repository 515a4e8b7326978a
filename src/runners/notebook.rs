//! Notebook runs inside a hosted workspace; bindings become notebook
//! parameters.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{CorrelationHandle, NotebookStepConfig, ParameterBindings};

use super::{ExternalJob, PollOutcome, RemoteJobStatus, RunnerError, StepContext};

#[async_trait]
pub trait NotebookClient: Send + Sync {
    async fn start_run(
        &self,
        service_id: i64,
        workspace_id: &str,
        notebook_id: &str,
        bindings: &ParameterBindings,
    ) -> Result<String, RunnerError>;

    async fn run_status(
        &self,
        service_id: i64,
        run_id: &str,
    ) -> Result<RemoteJobStatus, RunnerError>;

    async fn cancel_run(&self, service_id: i64, run_id: &str) -> Result<(), RunnerError>;
}

pub struct NotebookRun {
    client: Arc<dyn NotebookClient>,
    config: NotebookStepConfig,
}

impl NotebookRun {
    pub fn new(client: Arc<dyn NotebookClient>, config: NotebookStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ExternalJob for NotebookRun {
    async fn start(&self, ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let run_id = self
            .client
            .start_run(
                self.config.service_id,
                &self.config.workspace_id,
                &self.config.notebook_id,
                ctx.bindings,
            )
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
            .run_status(self.config.service_id, handle.as_str())
            .await?;
        Ok(status.into_poll_outcome())
    }

    async fn cancel(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        self.client
            .cancel_run(self.config.service_id, handle.as_str())
            .await
    }

    fn describe(&self) -> &'static str {
        "notebook run"
    }
}
