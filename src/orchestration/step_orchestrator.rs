//! Top-level entry point: run one step execution to a terminal attempt.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancellation::StopSignal;
use crate::config::EngineConfig;
use crate::constants::events;
use crate::events::{AttemptTransition, EventPublisher};
use crate::expression::ConditionEvaluator;
use crate::models::{
    AttemptKey, AttemptRecord, MessageChannel, MessageSet, NewAttempt, Parameter,
    ParameterBindings, StatusUpdate, StepDefinition,
};
use crate::runners::RunnerRegistry;
use crate::state_machine::Status;
use crate::store::{AttemptStore, StoreError};

use super::dependency_gate::{DependencyGate, GateDecision, GateInterrupt};
use super::retry::RetryCoordinator;

/// Failures that escape [`StepOrchestrator::run_step`]. Everything after the
/// first attempt row exists is folded into the attempt's terminal record;
/// only the inability to create that row surfaces here.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("could not create the attempt row: {0}")]
    Store(#[from] StoreError),
}

/// Owns the per-step lifecycle: pre-flight evaluation, the cross-execution
/// gate, the retry chain, and every persisted status transition.
///
/// One instance serves any number of concurrent step tasks; all shared state
/// lives behind the store.
pub struct StepOrchestrator {
    store: Arc<dyn AttemptStore>,
    evaluator: Arc<dyn ConditionEvaluator>,
    registry: RunnerRegistry,
    config: EngineConfig,
    events: EventPublisher,
}

impl StepOrchestrator {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        evaluator: Arc<dyn ConditionEvaluator>,
        registry: RunnerRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            evaluator,
            registry,
            config,
            events: EventPublisher::default(),
        }
    }

    /// Replace the default event publisher, so embedders can subscribe before
    /// any step runs.
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Run one step execution to a terminal attempt outcome.
    ///
    /// The returned record is the final attempt of the chain and is always in
    /// a terminal status, never `Retry`/`AwaitingRetry`.
    #[instrument(
        skip_all,
        fields(
            execution_id,
            step_id = step.step_id,
            step = %step.name,
            kind = %step.payload.kind(),
        )
    )]
    pub async fn run_step(
        &self,
        step: &StepDefinition,
        execution_id: i64,
        stop: &StopSignal,
    ) -> Result<AttemptRecord, OrchestrationError> {
        let key = AttemptKey::first(execution_id, step.step_id);
        self.store
            .create_attempt(NewAttempt::initial(execution_id, step.step_id))
            .await?;
        let _ = self
            .events
            .publish(
                events::ATTEMPT_CREATED,
                json!({
                    "execution_id": key.execution_id,
                    "step_id": key.step_id,
                    "retry_index": key.retry_index,
                }),
            )
            .await;

        // An already-requested stop settles the step before anything runs.
        if stop.is_triggered() {
            debug!("stop already requested, step never starts");
            let mut messages = MessageSet::new();
            messages.info("stop requested before the step started");
            return Ok(self
                .settle_unstarted(key, Status::Stopped, messages, stop.actor())
                .await);
        }

        // Pre-flight: parameters and the execution condition. Any failure
        // here is a configuration error, a hard Failed with no retry.
        let parameters = match self.prepare_parameters(step).await {
            Ok(parameters) => parameters,
            Err(reason) => {
                warn!(reason, "pre-flight parameter evaluation failed");
                let mut messages = MessageSet::new();
                messages.error(reason);
                return Ok(self
                    .settle_unstarted(key, Status::Failed, messages, None)
                    .await);
            }
        };
        match self.evaluate_condition(step).await {
            Ok(true) => {}
            Ok(false) => {
                info!("execution condition evaluated false, skipping");
                let mut messages = MessageSet::new();
                messages.info("execution condition evaluated false");
                return Ok(self
                    .settle_unstarted(key, Status::Skipped, messages, None)
                    .await);
            }
            Err(reason) => {
                warn!(reason, "execution condition evaluation failed");
                let mut messages = MessageSet::new();
                messages.error(reason);
                return Ok(self
                    .settle_unstarted(key, Status::Failed, messages, None)
                    .await);
            }
        }

        // Cross-execution gate.
        let gate = DependencyGate::new(self.store.as_ref(), &self.config);
        match gate.wait_for_clearance(step, key, stop).await {
            Ok(GateDecision::Proceed) => {}
            Ok(GateDecision::Duplicate) => {
                let mut messages = MessageSet::new();
                messages.error("a duplicate attempt is running under another execution");
                return Ok(self
                    .settle_unstarted(key, Status::Duplicate, messages, None)
                    .await);
            }
            Err(GateInterrupt::Stopped) => {
                let mut messages = MessageSet::new();
                messages.info("stop requested while waiting at the gate");
                return Ok(self
                    .settle_unstarted(key, Status::Stopped, messages, stop.actor())
                    .await);
            }
            Err(GateInterrupt::Store(err)) => {
                let mut messages = MessageSet::new();
                messages.error(format!("gate query failed: {err}"));
                return Ok(self
                    .settle_unstarted(key, Status::Failed, messages, None)
                    .await);
            }
        }

        // Resolve the runner; an unconfigured step kind is a hard failure.
        let runner = match self.registry.resolve(&step.payload) {
            Ok(runner) => runner,
            Err(err) => {
                let mut messages = MessageSet::new();
                messages.error(err.to_string());
                return Ok(self
                    .settle_unstarted(key, Status::Failed, messages, None)
                    .await);
            }
        };

        let bindings = ParameterBindings::from_parameters(&parameters);
        let coordinator = RetryCoordinator::new(self.store.as_ref(), &self.events, &self.config);
        Ok(coordinator.run(step, key, &bindings, &runner, stop).await)
    }

    /// Pre-flight ordering: refresh inherited values from their source
    /// parameters, then evaluate `use_expression` parameters against the
    /// current snapshot, writing results back so later steps observe them.
    async fn prepare_parameters(&self, step: &StepDefinition) -> Result<Vec<Parameter>, String> {
        let mut parameters = step.parameters.clone();

        for parameter in &mut parameters {
            if let Some(source_id) = parameter.inherit_from_parameter_id {
                let value = self
                    .store
                    .read_parameter_value(source_id)
                    .await
                    .map_err(|err| {
                        format!(
                            "could not refresh inherited parameter '{}': {err}",
                            parameter.name
                        )
                    })?;
                parameter.value = value.clone();
                self.store
                    .write_parameter_value(parameter.parameter_id, value)
                    .await
                    .map_err(|err| {
                        format!(
                            "could not persist inherited parameter '{}': {err}",
                            parameter.name
                        )
                    })?;
            }
        }

        for index in 0..parameters.len() {
            if !parameters[index].use_expression {
                continue;
            }
            let expression = parameters[index].expression.clone().ok_or_else(|| {
                format!(
                    "parameter '{}' uses an expression but has none",
                    parameters[index].name
                )
            })?;
            let bindings = ParameterBindings::from_parameters(&parameters);
            let value = self
                .evaluator
                .evaluate_value(&expression, &bindings)
                .await
                .map_err(|err| err.to_string())?;
            parameters[index].value = value.clone();
            self.store
                .write_parameter_value(parameters[index].parameter_id, value)
                .await
                .map_err(|err| {
                    format!(
                        "could not persist evaluated parameter '{}': {err}",
                        parameters[index].name
                    )
                })?;
        }

        Ok(parameters)
    }

    /// Refresh the condition parameters from the store, then evaluate the
    /// execution condition against them. `Ok(true)` when no condition is set.
    async fn evaluate_condition(&self, step: &StepDefinition) -> Result<bool, String> {
        let Some(expression) = &step.execution_condition else {
            return Ok(true);
        };

        let mut bindings = ParameterBindings::new();
        for condition_parameter in &step.condition_parameters {
            let value = self
                .store
                .read_parameter_value(condition_parameter.execution_parameter_id)
                .await
                .map_err(|err| {
                    format!(
                        "could not read condition parameter '{}': {err}",
                        condition_parameter.name
                    )
                })?;
            bindings.set(condition_parameter.name.clone(), value);
        }

        self.evaluator
            .evaluate_bool(expression, &bindings)
            .await
            .map_err(|err| err.to_string())
    }

    /// Settle an attempt that never reached `Running`. Store failures here
    /// degrade to a local mirror; the step task must still end with a value.
    async fn settle_unstarted(
        &self,
        key: AttemptKey,
        status: Status,
        messages: MessageSet,
        stopped_by: Option<String>,
    ) -> AttemptRecord {
        for text in &messages.info {
            let _ = self
                .store
                .append_message(key, MessageChannel::Info, text)
                .await;
        }
        for text in &messages.errors {
            let _ = self
                .store
                .append_message(key, MessageChannel::Error, text)
                .await;
        }

        let mut update = StatusUpdate::to(status).ended_now();
        if let Some(actor) = stopped_by {
            update = update.stopped_by(actor);
        }
        match self.store.update_status(key, update).await {
            Ok(record) => {
                let _ = self
                    .events
                    .publish_transition(AttemptTransition::new(key, Status::NotStarted, status))
                    .await;
                record
            }
            Err(err) => {
                warn!(error = %err, "could not persist the unstarted settlement");
                match self.store.fetch_attempt(key).await {
                    Ok(record) => record,
                    Err(_) => AttemptRecord {
                        key,
                        status,
                        created_at: chrono::Utc::now(),
                        started_at: None,
                        ended_at: Some(chrono::Utc::now()),
                        stopped_by: None,
                        correlation_handle: None,
                        messages,
                        output: None,
                    },
                }
            }
        }
    }
}
