//! In-memory [`AttemptStore`] used by tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::models::{
    AttemptKey, AttemptRecord, CorrelationHandle, DependencyEdge, ExecutionOutcome,
    MessageChannel, MessageSet, NewAttempt, StatusUpdate,
};

use super::{
    validate_initial_status, validate_mutable, validate_transition, AttemptStore, StoreError,
};

#[derive(Debug, Clone, Copy)]
struct ExecutionRow {
    dependency_mode: bool,
    outcome: Option<ExecutionOutcome>,
}

/// Embedding-neutral store keeping everything in process memory.
///
/// Besides attempts it carries the execution rows, dependency edges, and
/// parameter values the gate queries and pre-flight reads consult, so a
/// single instance can back a whole test scenario. Shared across tasks
/// behind an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    attempts: DashMap<AttemptKey, AttemptRecord>,
    parameters: DashMap<i64, Value>,
    executions: DashMap<i64, ExecutionRow>,
    /// (step_id, depends_on_step_id)
    edges: RwLock<Vec<(i64, i64)>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution and whether it runs in dependency mode.
    pub fn register_execution(&self, execution_id: i64, dependency_mode: bool) {
        self.executions.insert(
            execution_id,
            ExecutionRow {
                dependency_mode,
                outcome: None,
            },
        );
    }

    /// Record the terminal outcome of an execution. Registers the execution
    /// if it was never seen, since schedulers may finish executions this
    /// store only observed through sub-job launches.
    pub fn finish_execution(&self, execution_id: i64, outcome: ExecutionOutcome) {
        self.executions
            .entry(execution_id)
            .or_insert(ExecutionRow {
                dependency_mode: false,
                outcome: None,
            })
            .outcome = Some(outcome);
    }

    /// Register a dependency edge consulted by the dependant/dependency
    /// queries.
    pub fn register_edge(&self, edge: DependencyEdge) {
        self.edges
            .write()
            .push((edge.step_id(), edge.depends_on_step_id()));
    }

    pub fn seed_parameter(&self, parameter_id: i64, value: Value) {
        self.parameters.insert(parameter_id, value);
    }

    fn execution_in_dependency_mode(&self, execution_id: i64) -> bool {
        self.executions
            .get(&execution_id)
            .map(|row| row.dependency_mode)
            .unwrap_or(false)
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn create_attempt(&self, new_attempt: NewAttempt) -> Result<AttemptRecord, StoreError> {
        validate_initial_status(&new_attempt)?;
        let record = AttemptRecord {
            key: new_attempt.key,
            status: new_attempt.status,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            stopped_by: None,
            correlation_handle: None,
            messages: MessageSet::new(),
            output: None,
        };
        match self.attempts.entry(new_attempt.key) {
            Entry::Occupied(_) => Err(StoreError::AttemptExists {
                key: new_attempt.key,
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update_status(
        &self,
        key: AttemptKey,
        update: StatusUpdate,
    ) -> Result<AttemptRecord, StoreError> {
        let mut record = self
            .attempts
            .get_mut(&key)
            .ok_or(StoreError::AttemptNotFound { key })?;
        validate_transition(key, record.status, update.status)?;

        record.status = update.status;
        if let Some(at) = update.started_at {
            record.started_at = Some(at);
        }
        if let Some(at) = update.ended_at {
            record.ended_at = Some(at);
        }
        if let Some(actor) = update.stopped_by {
            record.stopped_by = Some(actor);
        }
        if let Some(output) = update.output {
            record.output = Some(output);
        }
        Ok(record.clone())
    }

    async fn append_message(
        &self,
        key: AttemptKey,
        channel: MessageChannel,
        text: &str,
    ) -> Result<(), StoreError> {
        let mut record = self
            .attempts
            .get_mut(&key)
            .ok_or(StoreError::AttemptNotFound { key })?;
        validate_mutable(key, record.status)?;
        record.messages.push(channel, text);
        Ok(())
    }

    async fn set_correlation_handle(
        &self,
        key: AttemptKey,
        handle: &CorrelationHandle,
    ) -> Result<(), StoreError> {
        let mut record = self
            .attempts
            .get_mut(&key)
            .ok_or(StoreError::AttemptNotFound { key })?;
        validate_mutable(key, record.status)?;
        record.correlation_handle = Some(handle.clone());
        Ok(())
    }

    async fn fetch_attempt(&self, key: AttemptKey) -> Result<AttemptRecord, StoreError> {
        self.attempts
            .get(&key)
            .map(|record| record.clone())
            .ok_or(StoreError::AttemptNotFound { key })
    }

    async fn list_attempts_for_step(
        &self,
        execution_id: i64,
        step_id: i64,
    ) -> Result<Vec<AttemptRecord>, StoreError> {
        let mut chain: Vec<AttemptRecord> = self
            .attempts
            .iter()
            .filter(|record| {
                record.key.execution_id == execution_id && record.key.step_id == step_id
            })
            .map(|record| record.clone())
            .collect();
        chain.sort_by_key(|record| record.key.retry_index);
        Ok(chain)
    }

    async fn active_duplicate_attempts(
        &self,
        step_id: i64,
        exclude_execution: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttemptKey>, StoreError> {
        let mut keys: Vec<AttemptKey> = self
            .attempts
            .iter()
            .filter(|record| {
                record.key.step_id == step_id
                    && record.key.execution_id != exclude_execution
                    && record.status.is_active()
                    && record.created_at >= since
            })
            .map(|record| record.key)
            .collect();
        keys.sort_by_key(|key| (key.execution_id, key.retry_index));
        Ok(keys)
    }

    async fn active_dependant_attempts(
        &self,
        step_id: i64,
        exclude_execution: i64,
    ) -> Result<Vec<AttemptKey>, StoreError> {
        let dependants: Vec<i64> = self
            .edges
            .read()
            .iter()
            .filter(|(_, depends_on)| *depends_on == step_id)
            .map(|(dependant, _)| *dependant)
            .collect();

        let mut keys: Vec<AttemptKey> = self
            .attempts
            .iter()
            .filter(|record| {
                dependants.contains(&record.key.step_id)
                    && record.key.execution_id != exclude_execution
                    && record.status.is_active()
                    && self.execution_in_dependency_mode(record.key.execution_id)
            })
            .map(|record| record.key)
            .collect();
        keys.sort_by_key(|key| (key.execution_id, key.step_id, key.retry_index));
        Ok(keys)
    }

    async fn active_dependency_attempts(
        &self,
        step_ids: &[i64],
        exclude_execution: i64,
    ) -> Result<Vec<AttemptKey>, StoreError> {
        let mut keys: Vec<AttemptKey> = self
            .attempts
            .iter()
            .filter(|record| {
                step_ids.contains(&record.key.step_id)
                    && record.key.execution_id != exclude_execution
                    && record.status.is_active()
            })
            .map(|record| record.key)
            .collect();
        keys.sort_by_key(|key| (key.execution_id, key.step_id, key.retry_index));
        Ok(keys)
    }

    async fn read_parameter_value(&self, parameter_id: i64) -> Result<Value, StoreError> {
        self.parameters
            .get(&parameter_id)
            .map(|value| value.clone())
            .ok_or(StoreError::ParameterNotFound { parameter_id })
    }

    async fn write_parameter_value(
        &self,
        parameter_id: i64,
        value: Value,
    ) -> Result<(), StoreError> {
        self.parameters.insert(parameter_id, value);
        Ok(())
    }

    async fn execution_dependency_mode(&self, execution_id: i64) -> Result<bool, StoreError> {
        self.executions
            .get(&execution_id)
            .map(|row| row.dependency_mode)
            .ok_or(StoreError::ExecutionNotFound { execution_id })
    }

    async fn execution_outcome(
        &self,
        execution_id: i64,
    ) -> Result<Option<ExecutionOutcome>, StoreError> {
        self.executions
            .get(&execution_id)
            .map(|row| row.outcome)
            .ok_or(StoreError::ExecutionNotFound { execution_id })
    }
}
