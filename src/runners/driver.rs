//! The generic external-job driver.
//!
//! Every polled step kind shares this control flow:
//!
//! ```text
//! start                 -> failure is attempt failure, no inner retry
//! persist handle        -> failure is a warning only
//! arm timeout           -> countdown begins only after a successful start
//! poll on the interval  -> bounded retry around poll failures
//! on cancellation       -> one best-effort remote cancel, then classify:
//!                          timeout => Failed("timed out"), stop => Stopped
//! on terminal           -> classify the remote outcome
//! ```
//!
//! Direct (single-call) runners skip the handle and poll loop but run under
//! the same timeout and cancellation regime.

use tracing::{debug, info, warn};

use crate::cancellation::{CancelCause, StepCancellation};
use crate::models::{AttemptOutcome, CorrelationHandle, MessageSet};
use crate::runners::{
    DirectCall, ExternalJob, PollOutcome, RemoteDisposition, RemoteOutcome, RunnerError,
    StepContext,
};
use crate::runners::output::truncate_output;
use crate::store::AttemptStore;

/// Run one attempt of a polled external job to its terminal outcome.
///
/// Never returns an error: every failure mode is folded into the outcome so
/// the retry coordinator sees a single value per attempt.
pub async fn drive_external(
    job: &dyn ExternalJob,
    ctx: &StepContext<'_>,
    store: &dyn AttemptStore,
    cancellation: &mut StepCancellation,
) -> AttemptOutcome {
    let mut messages = MessageSet::new();

    // Submit. A failure here consumed no remote resources worth cancelling.
    let handle = match cancellation.checked(job.start(ctx)).await {
        Err(cause) => {
            debug!(step_id = ctx.key.step_id, "cancelled before start completed");
            return finish_cancelled(cause, messages, ctx);
        }
        Ok(Err(err)) => {
            messages.error(format!("failed to start {}: {err}", job.describe()));
            return AttemptOutcome::failed(messages, None);
        }
        Ok(Ok(handle)) => handle,
    };
    info!(
        execution_id = ctx.key.execution_id,
        step_id = ctx.key.step_id,
        retry_index = ctx.key.retry_index,
        handle = %handle,
        "{} started",
        job.describe()
    );
    messages.info(format!("{} started ({handle})", job.describe()));

    // Best-effort handle persistence, so the remote work stays identifiable
    // if this process dies mid-attempt.
    if let Err(err) = store.set_correlation_handle(ctx.key, &handle).await {
        warn!(handle = %handle, error = %err, "could not persist correlation handle");
        messages.warning(format!("could not persist correlation handle {handle}: {err}"));
    }

    // The budget covers remote execution, not submission latency.
    if let Some(budget) = ctx.step.timeout() {
        cancellation.arm_timeout(budget);
    }

    let remote = loop {
        match poll_with_retry(job, ctx, &handle, cancellation).await {
            Ok(PollOutcome::Terminal(remote)) => break remote,
            Ok(PollOutcome::Pending) => {
                if let Err(cause) = cancellation.pause(ctx.config.polling_interval()).await {
                    return cancel_remote(job, ctx, &handle, cause, messages).await;
                }
            }
            Err(PollAbort::Cancelled(cause)) => {
                return cancel_remote(job, ctx, &handle, cause, messages).await;
            }
            Err(PollAbort::Failed(err)) => {
                messages.error(format!("polling {} failed: {err}", job.describe()));
                return AttemptOutcome::failed(messages, None);
            }
        }
    };

    classify_remote(remote, messages, ctx)
}

/// Run one attempt of a single-call runner to its terminal outcome.
pub async fn drive_direct(
    call: &dyn DirectCall,
    ctx: &StepContext<'_>,
    cancellation: &mut StepCancellation,
) -> AttemptOutcome {
    let mut messages = MessageSet::new();

    // The single blocking call is the whole remote execution.
    if let Some(budget) = ctx.step.timeout() {
        cancellation.arm_timeout(budget);
    }

    match cancellation.checked(call.invoke(ctx)).await {
        Err(cause) => finish_cancelled(cause, messages, ctx),
        Ok(Err(err)) => {
            messages.error(format!("{} failed: {err}", call.describe()));
            AttemptOutcome::failed(messages, None)
        }
        Ok(Ok(remote)) => classify_remote(remote, messages, ctx),
    }
}

enum PollAbort {
    Cancelled(CancelCause),
    Failed(RunnerError),
}

/// One logical poll: up to `poll_failure_retry_limit` tries with linear
/// backoff between them. Aborts immediately on cancellation.
async fn poll_with_retry(
    job: &dyn ExternalJob,
    ctx: &StepContext<'_>,
    handle: &CorrelationHandle,
    cancellation: &StepCancellation,
) -> Result<PollOutcome, PollAbort> {
    let limit = ctx.config.poll_failure_retry_limit.max(1);

    for try_index in 1..=limit {
        match cancellation.checked(job.poll(ctx, handle)).await {
            Err(cause) => return Err(PollAbort::Cancelled(cause)),
            Ok(Ok(outcome)) => return Ok(outcome),
            Ok(Err(err)) if try_index == limit => return Err(PollAbort::Failed(err)),
            Ok(Err(err)) => {
                warn!(
                    step_id = ctx.key.step_id,
                    handle = %handle,
                    try_index,
                    limit,
                    error = %err,
                    "poll failed, backing off"
                );
                let backoff = ctx.config.poll_failure_backoff() * try_index;
                if let Err(cause) = cancellation.pause(backoff).await {
                    return Err(PollAbort::Cancelled(cause));
                }
            }
        }
    }
    unreachable!("poll loop returns within the bounded tries")
}

/// One best-effort remote cancel, then report the cancellation cause.
async fn cancel_remote(
    job: &dyn ExternalJob,
    ctx: &StepContext<'_>,
    handle: &CorrelationHandle,
    cause: CancelCause,
    mut messages: MessageSet,
) -> AttemptOutcome {
    if let Err(err) = job.cancel(ctx, handle).await {
        warn!(handle = %handle, error = %err, "remote cancel failed");
        messages.warning(format!("remote cancel of {} failed: {err}", job.describe()));
    } else {
        messages.info(format!("{} cancelled ({handle})", job.describe()));
    }
    finish_cancelled(cause, messages, ctx)
}

/// Terminal classification of a cancellation: timeout is a failure with an
/// explicit marker, an external stop is `Stopped`. Never conflated.
fn finish_cancelled(
    cause: CancelCause,
    mut messages: MessageSet,
    ctx: &StepContext<'_>,
) -> AttemptOutcome {
    match cause {
        CancelCause::Timeout => {
            messages.error(format!(
                "step '{}' timed out after {} minutes",
                ctx.step.name, ctx.step.timeout_minutes
            ));
            AttemptOutcome::failed(messages, None)
        }
        CancelCause::Stop => AttemptOutcome::stopped(messages),
    }
}

/// Fold the remote terminal outcome into the attempt outcome, capping any
/// captured output.
fn classify_remote(
    remote: RemoteOutcome,
    mut messages: MessageSet,
    ctx: &StepContext<'_>,
) -> AttemptOutcome {
    let RemoteOutcome {
        disposition,
        output,
        messages: remote_messages,
    } = remote;
    messages.absorb(remote_messages);
    let output = output.map(|value| truncate_output(value, ctx.config.max_captured_output_bytes));

    match disposition {
        RemoteDisposition::Succeeded => AttemptOutcome::succeeded(messages, output),
        RemoteDisposition::Failed => {
            if messages.errors.is_empty() {
                messages.error("external system reported failure");
            }
            AttemptOutcome::failed(messages, output)
        }
        RemoteDisposition::Cancelled => {
            if messages.errors.is_empty() {
                messages.error("cancelled in the external system");
            }
            AttemptOutcome::failed(messages, output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::StopSignal;
    use crate::config::EngineConfig;
    use crate::models::{
        AttemptKey, NewAttempt, ProcessStepConfig, StepDefinition, StepPayload,
    };
    use crate::state_machine::Status;
    use crate::store::{AttemptStore, InMemoryAttemptStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_step() -> StepDefinition {
        StepDefinition::new(
            77,
            1,
            "extract",
            StepPayload::Process(ProcessStepConfig {
                program: "/bin/true".into(),
                arguments: vec![],
                working_directory: None,
            }),
        )
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            polling_interval_ms: 5,
            poll_failure_backoff_ms: 1,
            ..EngineConfig::default()
        }
    }

    /// Scripted external job: a queue of poll results following one start.
    struct ScriptedJob {
        start_result: Mutex<Option<Result<CorrelationHandle, RunnerError>>>,
        polls: Mutex<Vec<Result<PollOutcome, RunnerError>>>,
        polls_seen: AtomicU32,
        cancels_seen: AtomicU32,
        cancel_fails: bool,
    }

    impl ScriptedJob {
        fn new(
            start_result: Result<CorrelationHandle, RunnerError>,
            polls: Vec<Result<PollOutcome, RunnerError>>,
        ) -> Self {
            Self {
                start_result: Mutex::new(Some(start_result)),
                polls: Mutex::new(polls),
                polls_seen: AtomicU32::new(0),
                cancels_seen: AtomicU32::new(0),
                cancel_fails: false,
            }
        }

        fn succeeding_after(pending_polls: usize, output: Option<serde_json::Value>) -> Self {
            let mut polls: Vec<Result<PollOutcome, RunnerError>> = Vec::new();
            for _ in 0..pending_polls {
                polls.push(Ok(PollOutcome::Pending));
            }
            polls.push(Ok(PollOutcome::Terminal(RemoteOutcome::succeeded(output))));
            Self::new(Ok(CorrelationHandle::new("run-1")), polls)
        }
    }

    #[async_trait]
    impl ExternalJob for ScriptedJob {
        async fn start(&self, _ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
            self.start_result
                .lock()
                .take()
                .unwrap_or_else(|| Err(RunnerError::external("script", "start called twice")))
        }

        async fn poll(
            &self,
            _ctx: &StepContext<'_>,
            _handle: &CorrelationHandle,
        ) -> Result<PollOutcome, RunnerError> {
            self.polls_seen.fetch_add(1, Ordering::SeqCst);
            let mut polls = self.polls.lock();
            if polls.is_empty() {
                // Keep reporting pending; lets cancellation tests hang here.
                return Ok(PollOutcome::Pending);
            }
            polls.remove(0)
        }

        async fn cancel(
            &self,
            _ctx: &StepContext<'_>,
            _handle: &CorrelationHandle,
        ) -> Result<(), RunnerError> {
            self.cancels_seen.fetch_add(1, Ordering::SeqCst);
            if self.cancel_fails {
                Err(RunnerError::external("script", "cancel rejected"))
            } else {
                Ok(())
            }
        }

        fn describe(&self) -> &'static str {
            "scripted job"
        }
    }

    async fn run_driver(
        job: &ScriptedJob,
        step: &StepDefinition,
        config: &EngineConfig,
        stop: StopSignal,
    ) -> (AttemptOutcome, Arc<InMemoryAttemptStore>) {
        let store = Arc::new(InMemoryAttemptStore::new());
        let key = AttemptKey::first(1, step.step_id);
        store
            .create_attempt(NewAttempt {
                key,
                status: Status::NotStarted,
            })
            .await
            .unwrap();
        // The driver only appends to an attempt the orchestrator moved to
        // Running.
        store
            .update_status(key, crate::models::StatusUpdate::to(Status::Running).started_now())
            .await
            .unwrap();

        let bindings = crate::models::ParameterBindings::new();
        let ctx = StepContext {
            step,
            key,
            bindings: &bindings,
            config,
            stop: &stop,
        };
        let mut cancellation = StepCancellation::new(stop.clone());
        let outcome = drive_external(job, &ctx, store.as_ref(), &mut cancellation).await;
        (outcome, store)
    }

    #[tokio::test]
    async fn success_after_pending_polls() {
        let job = ScriptedJob::succeeding_after(2, Some(json!({"rows": 5})));
        let (outcome, store) =
            run_driver(&job, &test_step(), &fast_config(), StopSignal::new()).await;

        assert_eq!(outcome.status, Status::Succeeded);
        assert_eq!(outcome.output, Some(json!({"rows": 5})));
        assert_eq!(job.polls_seen.load(Ordering::SeqCst), 3);
        assert_eq!(job.cancels_seen.load(Ordering::SeqCst), 0);

        // Handle persisted before the first poll finished the attempt.
        let record = store
            .fetch_attempt(AttemptKey::first(1, 77))
            .await
            .unwrap();
        assert_eq!(record.correlation_handle, Some(CorrelationHandle::new("run-1")));
    }

    #[tokio::test]
    async fn start_failure_is_attempt_failure_without_cancel() {
        let job = ScriptedJob::new(
            Err(RunnerError::external("cluster", "quota exhausted")),
            vec![],
        );
        let (outcome, _store) =
            run_driver(&job, &test_step(), &fast_config(), StopSignal::new()).await;

        assert_eq!(outcome.status, Status::Failed);
        assert!(outcome.messages.errors[0].contains("quota exhausted"));
        assert_eq!(job.polls_seen.load(Ordering::SeqCst), 0);
        assert_eq!(job.cancels_seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_poll_failures_are_retried_within_the_limit() {
        let job = ScriptedJob::new(
            Ok(CorrelationHandle::new("run-2")),
            vec![
                Err(RunnerError::external("api", "503")),
                Err(RunnerError::external("api", "503")),
                Ok(PollOutcome::Terminal(RemoteOutcome::succeeded(None))),
            ],
        );
        let (outcome, _store) =
            run_driver(&job, &test_step(), &fast_config(), StopSignal::new()).await;

        assert_eq!(outcome.status, Status::Succeeded);
        assert_eq!(job.polls_seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_failures_beyond_the_limit_fail_the_attempt() {
        let job = ScriptedJob::new(
            Ok(CorrelationHandle::new("run-3")),
            vec![
                Err(RunnerError::external("api", "503")),
                Err(RunnerError::external("api", "503")),
                Err(RunnerError::external("api", "503")),
            ],
        );
        let (outcome, _store) =
            run_driver(&job, &test_step(), &fast_config(), StopSignal::new()).await;

        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(job.polls_seen.load(Ordering::SeqCst), 3);
        assert!(outcome.messages.errors[0].contains("polling"));
    }

    #[tokio::test]
    async fn timeout_reports_failed_with_marker_and_cancels_remote() {
        // Step budgets are minute-granular, far too coarse for a test. Arm a
        // short deadline directly; the step itself carries no budget so the
        // driver leaves the armed one in place.
        let job = ScriptedJob::new(Ok(CorrelationHandle::new("run-4")), vec![]);
        let step = test_step();
        let config = fast_config();
        let store = Arc::new(InMemoryAttemptStore::new());
        let key = AttemptKey::first(1, step.step_id);
        store
            .create_attempt(NewAttempt {
                key,
                status: Status::NotStarted,
            })
            .await
            .unwrap();
        store
            .update_status(key, crate::models::StatusUpdate::to(Status::Running).started_now())
            .await
            .unwrap();
        let bindings = crate::models::ParameterBindings::new();
        let stop = StopSignal::new();
        let ctx = StepContext {
            step: &step,
            key,
            bindings: &bindings,
            config: &config,
            stop: &stop,
        };

        let mut cancellation = StepCancellation::new(stop.clone());
        cancellation.arm_timeout(Duration::from_millis(20));
        let outcome = drive_external(&job, &ctx, store.as_ref(), &mut cancellation).await;

        assert_eq!(outcome.status, Status::Failed);
        assert!(outcome.messages.errors[0].contains("timed out"));
        assert_eq!(job.cancels_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_reports_stopped_and_cancels_remote_once() {
        let job = ScriptedJob::new(Ok(CorrelationHandle::new("run-5")), vec![]);
        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger("operator");
        });

        let (outcome, _store) = run_driver(&job, &test_step(), &fast_config(), stop).await;

        assert_eq!(outcome.status, Status::Stopped);
        assert_eq!(job.cancels_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_remote_cancel_is_a_warning_only() {
        let mut job = ScriptedJob::new(Ok(CorrelationHandle::new("run-6")), vec![]);
        job.cancel_fails = true;
        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger("operator");
        });

        let (outcome, _store) = run_driver(&job, &test_step(), &fast_config(), stop).await;

        assert_eq!(outcome.status, Status::Stopped);
        assert!(outcome.messages.warnings[0].contains("remote cancel"));
    }

    #[tokio::test]
    async fn handle_persist_failure_is_a_warning_and_run_proceeds() {
        // A store without the attempt row makes the persist fail.
        let job = ScriptedJob::succeeding_after(0, None);
        let store = Arc::new(InMemoryAttemptStore::new());
        let step = test_step();
        let config = fast_config();
        let bindings = crate::models::ParameterBindings::new();
        let stop = StopSignal::new();
        let ctx = StepContext {
            step: &step,
            key: AttemptKey::first(9, step.step_id),
            bindings: &bindings,
            config: &config,
            stop: &stop,
        };
        let mut cancellation = StepCancellation::new(stop.clone());

        let outcome = drive_external(&job, &ctx, store.as_ref(), &mut cancellation).await;

        assert_eq!(outcome.status, Status::Warning);
        assert!(outcome.messages.warnings[0].contains("correlation handle"));
    }

    #[tokio::test]
    async fn oversized_remote_output_is_capped() {
        let config = EngineConfig {
            polling_interval_ms: 5,
            max_captured_output_bytes: 64,
            ..EngineConfig::default()
        };
        let job = ScriptedJob::succeeding_after(0, Some(json!("z".repeat(4096))));
        let store = Arc::new(InMemoryAttemptStore::new());
        let step = test_step();
        let key = AttemptKey::first(1, step.step_id);
        store
            .create_attempt(NewAttempt {
                key,
                status: Status::NotStarted,
            })
            .await
            .unwrap();
        store
            .update_status(key, crate::models::StatusUpdate::to(Status::Running).started_now())
            .await
            .unwrap();
        let bindings = crate::models::ParameterBindings::new();
        let stop = StopSignal::new();
        let ctx = StepContext {
            step: &step,
            key,
            bindings: &bindings,
            config: &config,
            stop: &stop,
        };
        let mut cancellation = StepCancellation::new(stop.clone());

        let outcome = drive_external(&job, &ctx, store.as_ref(), &mut cancellation).await;
        let text = outcome.output.unwrap();
        let text = text.as_str().unwrap();
        assert!(text.starts_with(crate::constants::TRUNCATION_MARKER));
        assert!(text.len() <= 64);
    }

    #[tokio::test]
    async fn direct_call_success_and_failure() {
        struct Direct {
            fail: bool,
        }

        #[async_trait]
        impl DirectCall for Direct {
            async fn invoke(&self, _ctx: &StepContext<'_>) -> Result<RemoteOutcome, RunnerError> {
                if self.fail {
                    Err(RunnerError::external("db", "syntax error"))
                } else {
                    Ok(RemoteOutcome::succeeded(Some(json!(42))))
                }
            }

            fn describe(&self) -> &'static str {
                "direct call"
            }
        }

        let step = test_step();
        let config = fast_config();
        let bindings = crate::models::ParameterBindings::new();
        let stop = StopSignal::new();
        let ctx = StepContext {
            step: &step,
            key: AttemptKey::first(1, step.step_id),
            bindings: &bindings,
            config: &config,
            stop: &stop,
        };

        let mut cancellation = StepCancellation::new(stop.clone());
        let ok = drive_direct(&Direct { fail: false }, &ctx, &mut cancellation).await;
        assert_eq!(ok.status, Status::Succeeded);
        assert_eq!(ok.output, Some(json!(42)));

        let mut cancellation = StepCancellation::new(stop.clone());
        let failed = drive_direct(&Direct { fail: true }, &ctx, &mut cancellation).await;
        assert_eq!(failed.status, Status::Failed);
        assert!(failed.messages.errors[0].contains("syntax error"));
    }
}
