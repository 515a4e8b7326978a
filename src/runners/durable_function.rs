//! Durable orchestrations on a function host: start returns an instance id
//! that is polled until the orchestration reaches a terminal runtime status.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{CorrelationHandle, DurableFunctionStepConfig, ParameterBindings};

use super::{ExternalJob, PollOutcome, RemoteJobStatus, RunnerError, StepContext};

#[async_trait]
pub trait DurableFunctionClient: Send + Sync {
    /// Start an orchestration instance with the bindings as its input.
    async fn start_orchestration(
        &self,
        service_id: i64,
        orchestrator_name: &str,
        input: &ParameterBindings,
    ) -> Result<String, RunnerError>;

    async fn orchestration_status(
        &self,
        service_id: i64,
        instance_id: &str,
    ) -> Result<RemoteJobStatus, RunnerError>;

    async fn terminate_orchestration(
        &self,
        service_id: i64,
        instance_id: &str,
    ) -> Result<(), RunnerError>;
}

pub struct DurableOrchestration {
    client: Arc<dyn DurableFunctionClient>,
    config: DurableFunctionStepConfig,
}

impl DurableOrchestration {
    pub fn new(client: Arc<dyn DurableFunctionClient>, config: DurableFunctionStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ExternalJob for DurableOrchestration {
    async fn start(&self, ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let instance_id = self
            .client
            .start_orchestration(
                self.config.service_id,
                &self.config.orchestrator_name,
                ctx.bindings,
            )
            .await?;
        Ok(CorrelationHandle::new(instance_id))
    }

    async fn poll(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<PollOutcome, RunnerError> {
        let status = self
            .client
            .orchestration_status(self.config.service_id, handle.as_str())
            .await?;
        Ok(status.into_poll_outcome())
    }

    async fn cancel(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        self.client
            .terminate_orchestration(self.config.service_id, handle.as_str())
            .await
    }

    fn describe(&self) -> &'static str {
        "durable orchestration"
    }
}
