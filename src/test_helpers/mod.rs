//! Programmable fakes for the engine's collaborator contracts.
//!
//! Used by this crate's integration tests and by embedders exercising the
//! orchestrator without real external systems: a scripted external job, a
//! scripted direct call, a table-driven expression evaluator, and an
//! in-process executor launcher for sub-job steps.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::expression::{ConditionEvaluator, ExpressionError};
use crate::models::{CorrelationHandle, ExecutionOutcome, ParameterBindings, ProcessStepConfig};
use crate::runners::{
    ExecutorLauncher, ExternalJob, PollOutcome, ProcessLauncher, RemoteOutcome, RunnerError,
    StepContext,
};
use crate::runners::DirectCall;

/// Scripted [`ExternalJob`]: polls consume a queue of results; counters
/// record how often each template operation ran.
///
/// An exhausted queue yields [`ScriptedJob::when_exhausted`], so a job can be
/// scripted to finish (the default) or to hang `Pending` forever for
/// timeout/stop tests.
pub struct ScriptedJob {
    start_failure: Mutex<Option<String>>,
    polls: Mutex<VecDeque<Result<PollOutcome, RunnerError>>>,
    when_exhausted: PollOutcome,
    cancel_fails: bool,
    starts: AtomicU32,
    polls_seen: AtomicU32,
    cancels_seen: AtomicU32,
}

impl Default for ScriptedJob {
    fn default() -> Self {
        Self {
            start_failure: Mutex::new(None),
            polls: Mutex::new(VecDeque::new()),
            when_exhausted: PollOutcome::Terminal(RemoteOutcome::succeeded(None)),
            cancel_fails: false,
            starts: AtomicU32::new(0),
            polls_seen: AtomicU32::new(0),
            cancels_seen: AtomicU32::new(0),
        }
    }
}

impl ScriptedJob {
    /// Job that starts and immediately reports success.
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Job whose polls report `Pending` forever; only cancellation ends it.
    pub fn hanging() -> Self {
        Self {
            when_exhausted: PollOutcome::Pending,
            ..Self::default()
        }
    }

    /// Job whose `start` fails with `reason` on every attempt.
    pub fn failing_to_start(reason: impl Into<String>) -> Self {
        Self {
            start_failure: Mutex::new(Some(reason.into())),
            ..Self::default()
        }
    }

    /// Queue one poll result; consumed in order across attempts.
    pub fn push_poll(&self, result: Result<PollOutcome, RunnerError>) {
        self.polls.lock().push_back(result);
    }

    /// Queue a terminal failure for the next attempt's poll.
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.push_poll(Ok(PollOutcome::Terminal(RemoteOutcome::failed(
            reason, None,
        ))));
    }

    /// Queue a terminal success for the next attempt's poll.
    pub fn push_success(&self, output: Option<Value>) {
        self.push_poll(Ok(PollOutcome::Terminal(RemoteOutcome::succeeded(output))));
    }

    pub fn with_failing_cancel(mut self) -> Self {
        self.cancel_fails = true;
        self
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn polls_seen(&self) -> u32 {
        self.polls_seen.load(Ordering::SeqCst)
    }

    pub fn cancels_seen(&self) -> u32 {
        self.cancels_seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalJob for ScriptedJob {
    async fn start(&self, _ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(reason) = self.start_failure.lock().clone() {
            return Err(RunnerError::external("scripted job", reason));
        }
        Ok(CorrelationHandle::new(format!("run-{attempt}")))
    }

    async fn poll(
        &self,
        _ctx: &StepContext<'_>,
        _handle: &CorrelationHandle,
    ) -> Result<PollOutcome, RunnerError> {
        self.polls_seen.fetch_add(1, Ordering::SeqCst);
        match self.polls.lock().pop_front() {
            Some(result) => result,
            None => Ok(self.when_exhausted.clone()),
        }
    }

    async fn cancel(
        &self,
        _ctx: &StepContext<'_>,
        _handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        self.cancels_seen.fetch_add(1, Ordering::SeqCst);
        if self.cancel_fails {
            Err(RunnerError::external("scripted job", "cancel rejected"))
        } else {
            Ok(())
        }
    }

    fn describe(&self) -> &'static str {
        "scripted job"
    }
}

/// Scripted [`DirectCall`]: a queue of invocation results, one per attempt.
/// An exhausted queue reports success without output.
#[derive(Default)]
pub struct ScriptedCall {
    results: Mutex<VecDeque<Result<RemoteOutcome, RunnerError>>>,
    invocations: AtomicU32,
}

impl ScriptedCall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Result<RemoteOutcome, RunnerError>) {
        self.results.lock().push_back(result);
    }

    pub fn push_success(&self, output: Option<Value>) {
        self.push(Ok(RemoteOutcome::succeeded(output)));
    }

    pub fn push_failure(&self, reason: impl Into<String>) {
        self.push(Err(RunnerError::external("scripted call", reason.into())));
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectCall for ScriptedCall {
    async fn invoke(&self, _ctx: &StepContext<'_>) -> Result<RemoteOutcome, RunnerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.results.lock().pop_front() {
            Some(result) => result,
            None => Ok(RemoteOutcome::succeeded(None)),
        }
    }

    fn describe(&self) -> &'static str {
        "scripted call"
    }
}

/// Table-driven [`ConditionEvaluator`]: expression text maps to a fixed
/// value; unscripted expressions fail evaluation.
#[derive(Default)]
pub struct FixedEvaluator {
    results: HashMap<String, Value>,
}

impl FixedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, expression: impl Into<String>, value: Value) -> Self {
        self.results.insert(expression.into(), value);
        self
    }

    /// Evaluator that treats every expression as the name of a binding and
    /// echoes its current value, for write-back round-trip tests.
    pub fn echoing() -> EchoEvaluator {
        EchoEvaluator
    }
}

#[async_trait]
impl ConditionEvaluator for FixedEvaluator {
    async fn evaluate_value(
        &self,
        expression: &str,
        _bindings: &ParameterBindings,
    ) -> Result<Value, ExpressionError> {
        self.results
            .get(expression)
            .cloned()
            .ok_or_else(|| ExpressionError::evaluation(expression, "unscripted expression"))
    }
}

/// Evaluator resolving an expression as a binding name.
pub struct EchoEvaluator;

#[async_trait]
impl ConditionEvaluator for EchoEvaluator {
    async fn evaluate_value(
        &self,
        expression: &str,
        bindings: &ParameterBindings,
    ) -> Result<Value, ExpressionError> {
        bindings
            .get(expression)
            .cloned()
            .ok_or_else(|| ExpressionError::evaluation(expression, "unbound name"))
    }
}

/// In-process [`ExecutorLauncher`]: mints sequential execution ids and lets
/// the test settle child outcomes when it chooses.
#[derive(Default)]
pub struct MemoryExecutorLauncher {
    next_execution_id: AtomicI64,
    outcomes: DashMap<i64, ExecutionOutcome>,
    started: Mutex<Vec<i64>>,
    cancelled: Mutex<Vec<(i64, String)>>,
}

impl MemoryExecutorLauncher {
    pub fn new() -> Self {
        Self {
            next_execution_id: AtomicI64::new(1000),
            ..Self::default()
        }
    }

    /// Settle a child execution, unblocking a waiting sub-job poll.
    pub fn finish(&self, execution_id: i64, outcome: ExecutionOutcome) {
        self.outcomes.insert(execution_id, outcome);
    }

    pub fn started(&self) -> Vec<i64> {
        self.started.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<(i64, String)> {
        self.cancelled.lock().clone()
    }
}

#[async_trait]
impl ExecutorLauncher for MemoryExecutorLauncher {
    async fn create_execution(&self, _job_id: i64) -> Result<i64, RunnerError> {
        Ok(self.next_execution_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn start_executor(&self, execution_id: i64) -> Result<(), RunnerError> {
        self.started.lock().push(execution_id);
        Ok(())
    }

    async fn execution_outcome(
        &self,
        execution_id: i64,
    ) -> Result<Option<ExecutionOutcome>, RunnerError> {
        Ok(self.outcomes.get(&execution_id).map(|entry| *entry))
    }

    async fn cancel_execution(&self, execution_id: i64, actor: &str) -> Result<(), RunnerError> {
        self.cancelled.lock().push((execution_id, actor.to_string()));
        Ok(())
    }
}

/// Scripted [`crate::runners::SqlClient`]: one result per execute call;
/// executed statements are recorded for assertions.
#[derive(Default)]
pub struct ScriptedSqlClient {
    results: Mutex<VecDeque<Result<Option<Value>, RunnerError>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedSqlClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_result(&self, result: Result<Option<Value>, RunnerError>) {
        self.results.lock().push_back(result);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl crate::runners::SqlClient for ScriptedSqlClient {
    async fn execute(
        &self,
        _connection_id: i64,
        statement: &str,
        _bindings: &ParameterBindings,
    ) -> Result<Option<Value>, RunnerError> {
        self.executed.lock().push(statement.to_string());
        self.results.lock().pop_front().unwrap_or(Ok(None))
    }
}

/// Scripted [`ProcessLauncher`] that never spawns a real process.
///
/// The usual way to route a scripted external job through the
/// [`crate::runners::RunnerRegistry`]: give the step a process payload and
/// register this launcher.
#[derive(Default)]
pub struct ScriptedProcessLauncher {
    spawn_failure: Mutex<Option<String>>,
    exits: Mutex<VecDeque<PollOutcome>>,
    hang_when_exhausted: bool,
    spawns: AtomicU32,
    kills: AtomicU32,
}

impl ScriptedProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_to_spawn(reason: impl Into<String>) -> Self {
        Self {
            spawn_failure: Mutex::new(Some(reason.into())),
            ..Self::default()
        }
    }

    /// Launcher whose child never exits; only a kill ends it.
    pub fn hanging() -> Self {
        Self {
            hang_when_exhausted: true,
            ..Self::default()
        }
    }

    /// Queue one exit-poll outcome; an exhausted queue reports success.
    pub fn push_exit(&self, outcome: PollOutcome) {
        self.exits.lock().push_back(outcome);
    }

    /// Queue a failing exit for the next attempt.
    pub fn push_failed_exit(&self, reason: impl Into<String>) {
        self.push_exit(PollOutcome::Terminal(RemoteOutcome::failed(reason, None)));
    }

    pub fn spawns(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> u32 {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedProcessLauncher {
    async fn spawn(&self, _config: &ProcessStepConfig) -> Result<CorrelationHandle, RunnerError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.spawn_failure.lock().clone() {
            return Err(RunnerError::external("scripted process", reason));
        }
        Ok(CorrelationHandle::new("4242"))
    }

    async fn poll_exit(&self, _handle: &CorrelationHandle) -> Result<PollOutcome, RunnerError> {
        Ok(self.exits.lock().pop_front().unwrap_or(if self.hang_when_exhausted {
            PollOutcome::Pending
        } else {
            PollOutcome::Terminal(RemoteOutcome::succeeded(None))
        }))
    }

    async fn kill(&self, _handle: &CorrelationHandle) -> Result<(), RunnerError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
