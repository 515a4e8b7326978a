//! Reloads of hosted analytics applications.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{AppReloadStepConfig, CorrelationHandle};

use super::{ExternalJob, PollOutcome, RemoteJobStatus, RunnerError, StepContext};

#[async_trait]
pub trait AppReloadClient: Send + Sync {
    async fn start_reload(&self, service_id: i64, app_id: &str) -> Result<String, RunnerError>;

    async fn reload_status(
        &self,
        service_id: i64,
        reload_id: &str,
    ) -> Result<RemoteJobStatus, RunnerError>;

    async fn cancel_reload(&self, service_id: i64, reload_id: &str) -> Result<(), RunnerError>;
}

pub struct AppReload {
    client: Arc<dyn AppReloadClient>,
    config: AppReloadStepConfig,
}

impl AppReload {
    pub fn new(client: Arc<dyn AppReloadClient>, config: AppReloadStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ExternalJob for AppReload {
    async fn start(&self, _ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let reload_id = self
            .client
            .start_reload(self.config.service_id, &self.config.app_id)
            .await?;
        Ok(CorrelationHandle::new(reload_id))
    }

    async fn poll(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<PollOutcome, RunnerError> {
        let status = self
            .client
            .reload_status(self.config.service_id, handle.as_str())
            .await?;
        Ok(status.into_poll_outcome())
    }

    async fn cancel(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        self.client
            .cancel_reload(self.config.service_id, handle.as_str())
            .await
    }

    fn describe(&self) -> &'static str {
        "app reload"
    }
}
