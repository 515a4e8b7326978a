//! Direct SQL execution.
//!
//! A SQL step is a single blocking call: there is no remote handle to track
//! and no poll loop, but the timeout and cancellation regime still applies to
//! the one call. A statement's scalar result is surfaced as the attempt
//! output; the orchestrator writes it into the configured capture parameter.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{ParameterBindings, SqlStepConfig};

use super::{DirectCall, RemoteOutcome, RunnerError, StepContext};

/// Abstract database connection surface: execute one statement and return its
/// scalar result, if any.
#[async_trait]
pub trait SqlClient: Send + Sync {
    async fn execute(
        &self,
        connection_id: i64,
        statement: &str,
        bindings: &ParameterBindings,
    ) -> Result<Option<Value>, RunnerError>;
}

/// One SQL statement run as a step.
pub struct SqlStatement {
    client: Arc<dyn SqlClient>,
    config: SqlStepConfig,
}

impl SqlStatement {
    pub fn new(client: Arc<dyn SqlClient>, config: SqlStepConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl DirectCall for SqlStatement {
    async fn invoke(&self, ctx: &StepContext<'_>) -> Result<RemoteOutcome, RunnerError> {
        let result = self
            .client
            .execute(self.config.connection_id, &self.config.statement, ctx.bindings)
            .await?;
        Ok(RemoteOutcome::succeeded(result))
    }

    fn describe(&self) -> &'static str {
        "sql statement"
    }
}
