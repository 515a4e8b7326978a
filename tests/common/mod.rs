//! Shared fixtures for the orchestrator integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use stepline_core::cancellation::StopSignal;
use stepline_core::config::EngineConfig;
use stepline_core::expression::ConditionEvaluator;
use stepline_core::models::{AttemptRecord, ProcessStepConfig, StepDefinition, StepPayload};
use stepline_core::orchestration::StepOrchestrator;
use stepline_core::runners::{ProcessLauncher, RunnerRegistry};
use stepline_core::store::{AttemptStore, InMemoryAttemptStore};
use stepline_core::test_helpers::{FixedEvaluator, ScriptedProcessLauncher};

pub const EXECUTION_ID: i64 = 1;

/// An orchestrator wired to an in-memory store and a scripted process
/// launcher, so any step can be exercised as a process payload.
pub struct Harness {
    pub store: Arc<InMemoryAttemptStore>,
    pub launcher: Arc<ScriptedProcessLauncher>,
    pub orchestrator: StepOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_launcher(ScriptedProcessLauncher::new())
    }

    pub fn with_launcher(launcher: ScriptedProcessLauncher) -> Self {
        Self::build(launcher, EngineConfig::default(), Arc::new(FixedEvaluator::new()))
    }

    pub fn with_evaluator(evaluator: impl ConditionEvaluator + 'static) -> Self {
        Self::build(
            ScriptedProcessLauncher::new(),
            EngineConfig::default(),
            Arc::new(evaluator),
        )
    }

    pub fn build(
        launcher: ScriptedProcessLauncher,
        config: EngineConfig,
        evaluator: Arc<dyn ConditionEvaluator>,
    ) -> Self {
        let store = Arc::new(InMemoryAttemptStore::new());
        store.register_execution(EXECUTION_ID, false);
        let launcher = Arc::new(launcher);
        let registry = RunnerRegistry::builder()
            .with_process_launcher(launcher.clone() as Arc<dyn ProcessLauncher>)
            .build();
        let orchestrator = StepOrchestrator::new(store.clone(), evaluator, registry, config);
        Self {
            store,
            launcher,
            orchestrator,
        }
    }

    pub async fn run(&self, step: &StepDefinition) -> AttemptRecord {
        self.run_under(step, &StopSignal::new()).await
    }

    pub async fn run_under(&self, step: &StepDefinition, stop: &StopSignal) -> AttemptRecord {
        self.orchestrator
            .run_step(step, EXECUTION_ID, stop)
            .await
            .unwrap()
    }

    pub async fn attempt_chain(&self, step_id: i64) -> Vec<AttemptRecord> {
        self.store
            .list_attempts_for_step(EXECUTION_ID, step_id)
            .await
            .unwrap()
    }
}

/// A step backed by the scripted process launcher, retry and timeout off.
pub fn process_step(step_id: i64, name: &str) -> StepDefinition {
    StepDefinition::new(
        step_id,
        1,
        name,
        StepPayload::Process(ProcessStepConfig {
            program: "/usr/bin/load".into(),
            arguments: vec![],
            working_directory: None,
        }),
    )
}
