//! End-to-end runs of a step through the orchestrator: pre-flight, the
//! execution condition, runner resolution, and terminal settlement.

mod common;

use std::sync::Arc;

use serde_json::json;
use stepline_core::cancellation::StopSignal;
use stepline_core::config::EngineConfig;
use stepline_core::events::EventPublisher;
use stepline_core::models::{
    ConditionParameter, Parameter, SqlStepConfig, StatusUpdate, StepPayload,
};
use stepline_core::orchestration::StepOrchestrator;
use stepline_core::runners::RunnerRegistry;
use stepline_core::state_machine::Status;
use stepline_core::store::{AttemptStore, InMemoryAttemptStore};
use stepline_core::test_helpers::{FixedEvaluator, ScriptedSqlClient};

use common::{process_step, Harness, EXECUTION_ID};

#[tokio::test]
async fn successful_step_settles_with_timestamps_and_handle() {
    let harness = Harness::new();
    let step = process_step(10, "extract");

    let record = harness.run(&step).await;

    assert_eq!(record.status, Status::Succeeded);
    assert!(record.started_at.is_some());
    assert!(record.ended_at.is_some());
    assert_eq!(record.correlation_handle.as_ref().unwrap().as_str(), "4242");
    assert_eq!(harness.launcher.spawns(), 1);

    // The returned record is the persisted one.
    let chain = harness.attempt_chain(10).await;
    assert_eq!(chain, vec![record]);
}

#[tokio::test]
async fn stop_requested_before_start_settles_without_running() {
    let harness = Harness::new();
    let step = process_step(11, "extract");
    let stop = StopSignal::new();
    stop.trigger("operator");

    let record = harness.run_under(&step, &stop).await;

    assert_eq!(record.status, Status::Stopped);
    assert_eq!(record.stopped_by.as_deref(), Some("operator"));
    assert!(record.started_at.is_none());
    assert_eq!(harness.launcher.spawns(), 0);
}

#[tokio::test]
async fn false_condition_skips_without_invoking_the_runner() {
    let harness =
        Harness::with_evaluator(FixedEvaluator::new().with("run_flag", json!(false)));
    let mut step = process_step(12, "conditional-load");
    step.execution_condition = Some("run_flag".into());

    let record = harness.run(&step).await;

    assert_eq!(record.status, Status::Skipped);
    assert!(record
        .messages
        .info
        .iter()
        .any(|text| text.contains("condition evaluated false")));
    assert_eq!(harness.launcher.spawns(), 0);
}

#[tokio::test]
async fn condition_reads_its_parameters_from_the_store() {
    let harness = Harness::with_evaluator(FixedEvaluator::echoing());
    let mut step = process_step(13, "conditional-load");
    step.execution_condition = Some("enabled".into());
    step.condition_parameters = vec![ConditionParameter {
        name: "enabled".into(),
        execution_parameter_id: 40,
    }];
    harness.store.seed_parameter(40, json!(true));

    let record = harness.run(&step).await;

    assert_eq!(record.status, Status::Succeeded);
    assert_eq!(harness.launcher.spawns(), 1);
}

#[tokio::test]
async fn condition_evaluation_failure_is_a_hard_failure() {
    // The evaluator knows nothing, so the expression fails to evaluate.
    let harness = Harness::with_evaluator(FixedEvaluator::new());
    let mut step = process_step(14, "conditional-load");
    step.execution_condition = Some("undefined_flag".into());
    step.retry_attempts = 3;

    let record = harness.run(&step).await;

    assert_eq!(record.status, Status::Failed);
    assert!(!record.messages.errors.is_empty());
    assert_eq!(harness.launcher.spawns(), 0);
    // Pre-flight failures bypass the retry budget entirely.
    assert_eq!(harness.attempt_chain(14).await.len(), 1);
}

#[tokio::test]
async fn non_boolean_condition_is_a_hard_failure() {
    let harness =
        Harness::with_evaluator(FixedEvaluator::new().with("run_flag", json!("yes")));
    let mut step = process_step(15, "conditional-load");
    step.execution_condition = Some("run_flag".into());

    let record = harness.run(&step).await;

    assert_eq!(record.status, Status::Failed);
    assert_eq!(harness.launcher.spawns(), 0);
}

#[tokio::test]
async fn unresolvable_inherited_parameter_fails_pre_flight() {
    let harness = Harness::new();
    let mut step = process_step(16, "extract");
    step.parameters = vec![Parameter::inherited(50, "as_of", 999)];
    step.retry_attempts = 2;

    let record = harness.run(&step).await;

    assert_eq!(record.status, Status::Failed);
    assert!(record.messages.errors[0].contains("as_of"));
    assert_eq!(harness.launcher.spawns(), 0);
    assert_eq!(harness.attempt_chain(16).await.len(), 1);
}

#[tokio::test]
async fn parameter_pre_flight_refreshes_inherited_then_evaluates_expressions() {
    // "target" copies the refreshed "as_of" through the echo evaluator.
    let harness = Harness::with_evaluator(FixedEvaluator::echoing());
    let mut step = process_step(17, "extract");
    step.parameters = vec![
        Parameter::inherited(51, "as_of", 60),
        Parameter::from_expression(52, "target", "as_of"),
    ];
    harness.store.seed_parameter(60, json!("2026-08-30"));

    let record = harness.run(&step).await;

    assert_eq!(record.status, Status::Succeeded);
    assert_eq!(
        harness.store.read_parameter_value(51).await.unwrap(),
        json!("2026-08-30")
    );
    assert_eq!(
        harness.store.read_parameter_value(52).await.unwrap(),
        json!("2026-08-30")
    );
}

#[tokio::test]
async fn unconfigured_step_kind_is_a_hard_failure() {
    // The harness registry carries only the process launcher.
    let harness = Harness::new();
    let mut step = process_step(18, "notify");
    step.payload = StepPayload::HttpFunction(stepline_core::models::HttpFunctionStepConfig {
        service_id: 3,
        function_name: "notify".into(),
    });

    let record = harness.run(&step).await;

    assert_eq!(record.status, Status::Failed);
    assert!(record.messages.errors[0].contains("no http_function client"));
}

#[tokio::test]
async fn settled_attempts_reject_further_updates() {
    let harness = Harness::new();
    let step = process_step(19, "extract");

    let record = harness.run(&step).await;
    assert_eq!(record.status, Status::Succeeded);

    let err = harness
        .store
        .update_status(record.key, StatusUpdate::to(Status::Failed))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        stepline_core::store::StoreError::AttemptFinalized { .. }
    ));
}

#[tokio::test]
async fn sql_step_captures_its_result_into_the_parameter() {
    let sql = Arc::new(ScriptedSqlClient::new());
    sql.push_result(Ok(Some(json!("2026-08-30"))));
    let store = Arc::new(InMemoryAttemptStore::new());
    store.register_execution(EXECUTION_ID, false);
    let registry = RunnerRegistry::builder().with_sql(sql.clone()).build();
    let orchestrator = StepOrchestrator::new(
        store.clone(),
        Arc::new(FixedEvaluator::new()),
        registry,
        EngineConfig::default(),
    );

    let mut step = process_step(20, "bookmark");
    step.payload = StepPayload::Sql(SqlStepConfig {
        connection_id: 5,
        statement: "select max(loaded_at) from staging.orders".into(),
        capture_parameter_id: Some(70),
    });

    let record = orchestrator
        .run_step(&step, EXECUTION_ID, &StopSignal::new())
        .await
        .unwrap();

    assert_eq!(record.status, Status::Succeeded);
    assert_eq!(record.output, Some(json!("2026-08-30")));
    assert_eq!(store.read_parameter_value(70).await.unwrap(), json!("2026-08-30"));
    assert_eq!(
        sql.executed(),
        vec!["select max(loaded_at) from staging.orders".to_string()]
    );
}

#[tokio::test]
async fn capture_without_a_result_demotes_success_to_warning() {
    let sql = Arc::new(ScriptedSqlClient::new());
    sql.push_result(Ok(None));
    let store = Arc::new(InMemoryAttemptStore::new());
    store.register_execution(EXECUTION_ID, false);
    let registry = RunnerRegistry::builder().with_sql(sql).build();
    let orchestrator = StepOrchestrator::new(
        store,
        Arc::new(FixedEvaluator::new()),
        registry,
        EngineConfig::default(),
    );

    let mut step = process_step(21, "bookmark");
    step.payload = StepPayload::Sql(SqlStepConfig {
        connection_id: 5,
        statement: "select 1 where false".into(),
        capture_parameter_id: Some(71),
    });

    let record = orchestrator
        .run_step(&step, EXECUTION_ID, &StopSignal::new())
        .await
        .unwrap();

    assert_eq!(record.status, Status::Warning);
    assert!(record.messages.warnings[0].contains("no result to capture"));
}

#[tokio::test]
async fn lifecycle_events_are_published_in_order() {
    let events = EventPublisher::new(64);
    let mut subscriber = events.subscribe();

    let store = Arc::new(InMemoryAttemptStore::new());
    store.register_execution(EXECUTION_ID, false);
    let launcher = Arc::new(stepline_core::test_helpers::ScriptedProcessLauncher::new());
    let registry = RunnerRegistry::builder()
        .with_process_launcher(launcher)
        .build();
    let orchestrator = StepOrchestrator::new(
        store,
        Arc::new(FixedEvaluator::new()),
        registry,
        EngineConfig::default(),
    )
    .with_events(events);

    let step = process_step(22, "extract");
    orchestrator
        .run_step(&step, EXECUTION_ID, &StopSignal::new())
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(event) = subscriber.try_recv() {
        names.push(event.name);
    }
    assert_eq!(
        names,
        vec!["attempt.created", "attempt.running", "attempt.succeeded"]
    );
}
