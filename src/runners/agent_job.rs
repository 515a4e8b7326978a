//! Database-server agent jobs, started by name and polled until the agent
//! reports a terminal run state.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{AgentJobStepConfig, CorrelationHandle};

use super::{ExternalJob, PollOutcome, RemoteJobStatus, RunnerError, StepContext};

/// Abstract agent surface of a database server.
#[async_trait]
pub trait AgentJobClient: Send + Sync {
    /// Start the named job and return the agent's identifier for this run.
    async fn start_job(&self, connection_id: i64, job_name: &str)
        -> Result<String, RunnerError>;

    async fn job_status(
        &self,
        connection_id: i64,
        run_id: &str,
    ) -> Result<RemoteJobStatus, RunnerError>;

    async fn stop_job(&self, connection_id: i64, run_id: &str) -> Result<(), RunnerError>;
}

pub struct AgentJobRun {
    client: Arc<dyn AgentJobClient>,
    config: AgentJobStepConfig,
}

impl AgentJobRun {
    pub fn new(client: Arc<dyn AgentJobClient>, config: AgentJobStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ExternalJob for AgentJobRun {
    async fn start(&self, _ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let run_id = self
            .client
            .start_job(self.config.connection_id, &self.config.job_name)
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
            .job_status(self.config.connection_id, handle.as_str())
            .await?;
        Ok(status.into_poll_outcome())
    }

    async fn cancel(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        self.client
            .stop_job(self.config.connection_id, handle.as_str())
            .await
    }

    fn describe(&self) -> &'static str {
        "agent job"
    }
}
