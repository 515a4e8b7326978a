//! The attempt-chain loop: bounded retry with interval delay.
//!
//! Retry is an explicit loop over persisted attempt rows, never recursion.
//! Each failing attempt that still has budget is settled as `Retry`, its
//! successor row is created immediately as `AwaitingRetry` (so gate queries
//! in other executions keep seeing the step as active through the delay),
//! and only then does the interval delay run. Message buffers are strictly
//! per attempt; a successor starts empty.

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::cancellation::{CancelCause, StepCancellation, StopSignal};
use crate::config::EngineConfig;
use crate::constants::events;
use crate::events::{AttemptTransition, EventPublisher};
use crate::models::{
    AttemptKey, AttemptOutcome, AttemptRecord, MessageChannel, MessageSet, NewAttempt,
    ParameterBindings, StatusUpdate, StepDefinition, StepPayload,
};
use crate::runners::{drive_direct, drive_external, StepContext, StepRunner};
use crate::state_machine::Status;
use crate::store::{AttemptStore, StoreError};

/// Drives one step's attempt chain to a terminal record.
pub struct RetryCoordinator<'a> {
    store: &'a dyn AttemptStore,
    events: &'a EventPublisher,
    config: &'a EngineConfig,
}

impl<'a> RetryCoordinator<'a> {
    pub fn new(
        store: &'a dyn AttemptStore,
        events: &'a EventPublisher,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    /// Run attempts starting at `first` until one settles terminally.
    ///
    /// The attempt row behind `first` must exist in `NotStarted`. Every
    /// failure mode is folded into the returned record; a store outage
    /// mid-chain is settled best-effort as `Failed`.
    pub async fn run(
        &self,
        step: &StepDefinition,
        first: AttemptKey,
        bindings: &ParameterBindings,
        runner: &StepRunner,
        stop: &StopSignal,
    ) -> AttemptRecord {
        let mut key = first;
        loop {
            let from = if key.is_first() {
                Status::NotStarted
            } else {
                Status::AwaitingRetry
            };
            if let Err(err) = self
                .transition(key, from, StatusUpdate::to(Status::Running).started_now())
                .await
            {
                return self.abandon(key, err).await;
            }

            let ctx = StepContext {
                step,
                key,
                bindings,
                config: self.config,
                stop,
            };
            let mut cancellation = StepCancellation::new(stop.clone());
            let mut outcome = match runner {
                StepRunner::External(job) => {
                    drive_external(job.as_ref(), &ctx, self.store, &mut cancellation).await
                }
                StepRunner::Direct(call) => {
                    drive_direct(call.as_ref(), &ctx, &mut cancellation).await
                }
            };
            let timed_out = matches!(cancellation.cause(), Some(CancelCause::Timeout));

            if outcome.status.is_success() {
                self.capture_result(step, &mut outcome).await;
            }

            match outcome.status {
                Status::Succeeded | Status::Warning => {
                    return self.settle(key, outcome, None).await;
                }
                Status::Stopped => {
                    return self.settle(key, outcome, stop.actor()).await;
                }
                Status::Failed if !timed_out && step.can_retry_from(key.retry_index) => {
                    match self.schedule_retry(step, key, outcome, stop).await {
                        Ok(Some(next)) => key = next,
                        Ok(None) => {
                            // Stop fired during the delay; the pending
                            // attempt is already settled as Stopped.
                            return match self.store.fetch_attempt(key.successor()).await {
                                Ok(record) => record,
                                Err(err) => self.abandon(key.successor(), err).await,
                            };
                        }
                        Err(err) => return self.abandon(key, err).await,
                    }
                }
                Status::Failed => {
                    return self.settle(key, outcome, None).await;
                }
                status => {
                    // Runners only produce the four statuses above.
                    error!(%status, "runner produced a non-terminal outcome");
                    let mut messages = MessageSet::new();
                    messages.error(format!("internal error: runner produced status {status}"));
                    return self
                        .settle(key, AttemptOutcome::failed(messages, None), None)
                        .await;
                }
            }
        }
    }

    /// Settle the failing attempt as `Retry`, create its successor, and wait
    /// out the retry interval. `Ok(Some(next))` means the successor may run;
    /// `Ok(None)` means the stop signal settled it as `Stopped`.
    async fn schedule_retry(
        &self,
        step: &StepDefinition,
        key: AttemptKey,
        outcome: AttemptOutcome,
        stop: &StopSignal,
    ) -> Result<Option<AttemptKey>, StoreError> {
        info!(
            execution_id = key.execution_id,
            step_id = key.step_id,
            retry_index = key.retry_index,
            of = step.retry_attempts,
            delay_minutes = step.retry_interval_minutes,
            "attempt failed, scheduling retry"
        );

        self.append_messages(key, &outcome.messages).await?;
        self.transition(
            key,
            Status::Running,
            StatusUpdate::to(Status::Retry)
                .ended_now()
                .with_output(outcome.output),
        )
        .await?;

        let next = key.successor();
        self.store.create_attempt(NewAttempt::retry_of(&key)).await?;
        let _ = self
            .events
            .publish(
                events::ATTEMPT_RETRY_SCHEDULED,
                json!({
                    "execution_id": next.execution_id,
                    "step_id": next.step_id,
                    "retry_index": next.retry_index,
                }),
            )
            .await;

        let stopped = tokio::select! {
            _ = stop.triggered() => true,
            _ = tokio::time::sleep(step.retry_interval()) => false,
        };
        if stopped {
            let _ = self
                .store
                .append_message(
                    next,
                    MessageChannel::Info,
                    "stop requested during the retry delay",
                )
                .await;
            let mut update = StatusUpdate::to(Status::Stopped).ended_now();
            if let Some(actor) = stop.actor() {
                update = update.stopped_by(actor);
            }
            self.transition(next, Status::AwaitingRetry, update).await?;
            return Ok(None);
        }
        Ok(Some(next))
    }

    /// Write the captured statement result back into the capture parameter,
    /// so later steps inheriting it observe the new value. A failed write
    /// demotes the outcome to `Warning`, never to `Failed`.
    async fn capture_result(&self, step: &StepDefinition, outcome: &mut AttemptOutcome) {
        let StepPayload::Sql(config) = &step.payload else {
            return;
        };
        let Some(parameter_id) = config.capture_parameter_id else {
            return;
        };
        let Some(value) = outcome.output.clone() else {
            outcome
                .messages
                .warning("statement produced no result to capture");
            if outcome.status == Status::Succeeded {
                outcome.status = Status::Warning;
            }
            return;
        };

        if let Err(err) = self.store.write_parameter_value(parameter_id, value).await {
            warn!(parameter_id, error = %err, "could not write captured result");
            outcome
                .messages
                .warning(format!("could not write captured result: {err}"));
            if outcome.status == Status::Succeeded {
                outcome.status = Status::Warning;
            }
        }
    }

    /// Persist the terminal outcome: messages first (the row is still live),
    /// then the final status in one field-scoped update.
    async fn settle(
        &self,
        key: AttemptKey,
        outcome: AttemptOutcome,
        stopped_by: Option<String>,
    ) -> AttemptRecord {
        if let Err(err) = self.append_messages(key, &outcome.messages).await {
            return self.abandon(key, err).await;
        }
        let mut update = StatusUpdate::to(outcome.status)
            .ended_now()
            .with_output(outcome.output);
        if let Some(actor) = stopped_by {
            update = update.stopped_by(actor);
        }
        match self.transition(key, Status::Running, update).await {
            Ok(record) => record,
            Err(err) => self.abandon(key, err).await,
        }
    }

    async fn append_messages(
        &self,
        key: AttemptKey,
        messages: &MessageSet,
    ) -> Result<(), StoreError> {
        for text in &messages.info {
            self.store
                .append_message(key, MessageChannel::Info, text)
                .await?;
        }
        for text in &messages.warnings {
            self.store
                .append_message(key, MessageChannel::Warning, text)
                .await?;
        }
        for text in &messages.errors {
            self.store
                .append_message(key, MessageChannel::Error, text)
                .await?;
        }
        Ok(())
    }

    async fn transition(
        &self,
        key: AttemptKey,
        from: Status,
        update: StatusUpdate,
    ) -> Result<AttemptRecord, StoreError> {
        let to = update.status;
        let record = self.store.update_status(key, update).await?;
        let _ = self
            .events
            .publish_transition(AttemptTransition::new(key, from, to))
            .await;
        Ok(record)
    }

    /// A store outage mid-chain: settle as `Failed` best-effort and return a
    /// local mirror of the record so the caller still gets a terminal value.
    async fn abandon(&self, key: AttemptKey, err: StoreError) -> AttemptRecord {
        error!(
            execution_id = key.execution_id,
            step_id = key.step_id,
            retry_index = key.retry_index,
            error = %err,
            "store failure mid-attempt, settling as failed"
        );
        let text = format!("attempt abandoned after store failure: {err}");
        let _ = self
            .store
            .append_message(key, MessageChannel::Error, &text)
            .await;
        let _ = self
            .store
            .update_status(key, StatusUpdate::to(Status::Failed).ended_now())
            .await;
        match self.store.fetch_attempt(key).await {
            Ok(record) => record,
            Err(_) => {
                let mut messages = MessageSet::new();
                messages.error(text);
                AttemptRecord {
                    key,
                    status: Status::Failed,
                    created_at: Utc::now(),
                    started_at: None,
                    ended_at: Some(Utc::now()),
                    stopped_by: None,
                    correlation_handle: None,
                    messages,
                    output: None,
                }
            }
        }
    }
}
