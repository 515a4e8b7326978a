//! Deployed integration packages, executed out of a catalog by
//! folder/project/package path.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{CorrelationHandle, PackageStepConfig, ParameterBindings};

use super::{ExternalJob, PollOutcome, RemoteJobStatus, RunnerError, StepContext};

/// Abstract catalog surface for package executions.
#[async_trait]
pub trait PackageClient: Send + Sync {
    /// Create and start a catalog execution, returning its execution id.
    async fn start_package(
        &self,
        connection_id: i64,
        config: &PackageStepConfig,
        bindings: &ParameterBindings,
    ) -> Result<String, RunnerError>;

    async fn package_status(
        &self,
        connection_id: i64,
        execution_id: &str,
    ) -> Result<RemoteJobStatus, RunnerError>;

    async fn stop_package(
        &self,
        connection_id: i64,
        execution_id: &str,
    ) -> Result<(), RunnerError>;
}

pub struct PackageRun {
    client: Arc<dyn PackageClient>,
    config: PackageStepConfig,
}

impl PackageRun {
    pub fn new(client: Arc<dyn PackageClient>, config: PackageStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ExternalJob for PackageRun {
    async fn start(&self, ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let execution_id = self
            .client
            .start_package(self.config.connection_id, &self.config, ctx.bindings)
            .await?;
        Ok(CorrelationHandle::new(execution_id))
    }

    async fn poll(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<PollOutcome, RunnerError> {
        let status = self
            .client
            .package_status(self.config.connection_id, handle.as_str())
            .await?;
        Ok(status.into_poll_outcome())
    }

    async fn cancel(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        self.client
            .stop_package(self.config.connection_id, handle.as_str())
            .await
    }

    fn describe(&self) -> &'static str {
        "package execution"
    }
}
