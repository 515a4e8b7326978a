//! Single HTTP function invocations.
//!
//! A direct call like SQL: the response body is the whole remote execution,
//! captured as attempt output. The step's bindings are posted as the request
//! payload.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{HttpFunctionStepConfig, ParameterBindings};

use super::{DirectCall, RemoteOutcome, RunnerError, StepContext};

#[async_trait]
pub trait HttpFunctionClient: Send + Sync {
    /// Invoke the named function and return the response body, if any.
    async fn invoke_function(
        &self,
        service_id: i64,
        function_name: &str,
        payload: &ParameterBindings,
    ) -> Result<Option<Value>, RunnerError>;
}

pub struct HttpFunctionCall {
    client: Arc<dyn HttpFunctionClient>,
    config: HttpFunctionStepConfig,
}

impl HttpFunctionCall {
    pub fn new(client: Arc<dyn HttpFunctionClient>, config: HttpFunctionStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl DirectCall for HttpFunctionCall {
    async fn invoke(&self, ctx: &StepContext<'_>) -> Result<RemoteOutcome, RunnerError> {
        let body = self
            .client
            .invoke_function(self.config.service_id, &self.config.function_name, ctx.bindings)
            .await?;
        Ok(RemoteOutcome::succeeded(body))
    }

    fn describe(&self) -> &'static str {
        "http function"
    }
}
