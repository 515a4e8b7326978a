//! Persistence contract for attempts and the shared state the gates read.
//!
//! The store is the single shared mutable resource of the engine: every
//! status transition, message, correlation handle, and parameter write goes
//! through it, and cross-execution coordination happens as polled reads
//! against it. Updates are field-scoped so concurrent step tasks writing
//! different attempts never interfere.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::models::{
    AttemptKey, AttemptRecord, CorrelationHandle, ExecutionOutcome, MessageChannel, NewAttempt,
    StatusUpdate,
};
use crate::state_machine::Status;

pub use memory::InMemoryAttemptStore;
#[cfg(feature = "postgres")]
pub use postgres::PgAttemptStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("attempt for {key} already exists")]
    AttemptExists { key: AttemptKey },

    #[error("attempt for {key} not found")]
    AttemptNotFound { key: AttemptKey },

    #[error("attempt for {key} is already terminal ({status})")]
    AttemptFinalized { key: AttemptKey, status: Status },

    #[error("illegal status transition for {key}: {from} -> {to}")]
    IllegalTransition {
        key: AttemptKey,
        from: Status,
        to: Status,
    },

    #[error("attempts are created as not_started or awaiting_retry, not {status} ({key})")]
    InvalidInitialStatus { key: AttemptKey, status: Status },

    #[error("parameter {parameter_id} not found")]
    ParameterNotFound { parameter_id: i64 },

    #[error("execution {execution_id} not found")]
    ExecutionNotFound { execution_id: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored value could not be decoded: {0}")]
    Decode(String),
}

/// Async persistence contract for attempt state.
///
/// Implementations enforce the transition table: once an attempt is terminal
/// no mutation succeeds, and non-adjacent status pairs are rejected.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Insert a new attempt row. The store stamps `created_at`.
    async fn create_attempt(&self, new_attempt: NewAttempt) -> Result<AttemptRecord, StoreError>;

    /// Apply a field-scoped status update and return the updated record.
    async fn update_status(
        &self,
        key: AttemptKey,
        update: StatusUpdate,
    ) -> Result<AttemptRecord, StoreError>;

    /// Append one diagnostic message to the given channel.
    async fn append_message(
        &self,
        key: AttemptKey,
        channel: MessageChannel,
        text: &str,
    ) -> Result<(), StoreError>;

    /// Record the external system's identifier for the submitted work.
    async fn set_correlation_handle(
        &self,
        key: AttemptKey,
        handle: &CorrelationHandle,
    ) -> Result<(), StoreError>;

    async fn fetch_attempt(&self, key: AttemptKey) -> Result<AttemptRecord, StoreError>;

    /// Retry chain of one step within one execution, ordered by retry index.
    async fn list_attempts_for_step(
        &self,
        execution_id: i64,
        step_id: i64,
    ) -> Result<Vec<AttemptRecord>, StoreError>;

    /// Active (Running/AwaitingRetry) attempts of `step_id` created at or
    /// after `since` under executions other than `exclude_execution`.
    async fn active_duplicate_attempts(
        &self,
        step_id: i64,
        exclude_execution: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttemptKey>, StoreError>;

    /// Active attempts, under other executions in dependency mode, of steps
    /// that list `step_id` as one of their dependencies.
    async fn active_dependant_attempts(
        &self,
        step_id: i64,
        exclude_execution: i64,
    ) -> Result<Vec<AttemptKey>, StoreError>;

    /// Active attempts, under other executions, of any of `step_ids`.
    async fn active_dependency_attempts(
        &self,
        step_ids: &[i64],
        exclude_execution: i64,
    ) -> Result<Vec<AttemptKey>, StoreError>;

    async fn read_parameter_value(&self, parameter_id: i64) -> Result<Value, StoreError>;

    async fn write_parameter_value(
        &self,
        parameter_id: i64,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Whether the execution coordinates with other executions' step order.
    async fn execution_dependency_mode(&self, execution_id: i64) -> Result<bool, StoreError>;

    /// Terminal classification of an execution, `None` while it still runs.
    async fn execution_outcome(
        &self,
        execution_id: i64,
    ) -> Result<Option<ExecutionOutcome>, StoreError>;
}

/// Validation shared by store implementations: initial status must be one of
/// the two entry states.
pub(crate) fn validate_initial_status(new_attempt: &NewAttempt) -> Result<(), StoreError> {
    match new_attempt.status {
        Status::NotStarted | Status::AwaitingRetry => Ok(()),
        status => Err(StoreError::InvalidInitialStatus {
            key: new_attempt.key,
            status,
        }),
    }
}

/// Validation shared by store implementations: settled attempts reject all
/// writes; live attempts only move along the transition table.
pub(crate) fn validate_transition(
    key: AttemptKey,
    from: Status,
    to: Status,
) -> Result<(), StoreError> {
    if from.is_settled() {
        return Err(StoreError::AttemptFinalized { key, status: from });
    }
    if !from.can_transition_to(to) {
        return Err(StoreError::IllegalTransition { key, from, to });
    }
    Ok(())
}

/// Guard for non-status writes (messages, correlation handles).
pub(crate) fn validate_mutable(key: AttemptKey, status: Status) -> Result<(), StoreError> {
    if status.is_settled() {
        return Err(StoreError::AttemptFinalized { key, status });
    }
    Ok(())
}
