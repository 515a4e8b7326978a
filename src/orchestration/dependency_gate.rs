//! Cross-execution waits evaluated before a step may start.
//!
//! Executions of the same job, or externally triggered re-runs, can
//! legitimately overlap. The gate keeps overlapping executions from writing
//! the same target concurrently and preserves dependency order across
//! execution boundaries. Coordination is polled reads against the shared
//! store; there is no process-to-process signalling.

use tracing::{debug, info};

use crate::cancellation::StopSignal;
use crate::config::EngineConfig;
use crate::models::{AttemptKey, DuplicatePolicy, MessageChannel, StepDefinition};
use crate::store::{AttemptStore, StoreError};

/// How the gate resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// All predicates clear; the step may start.
    Proceed,
    /// A live duplicate exists and the policy is `Fail`.
    Duplicate,
}

/// Why a wait ended early.
#[derive(Debug)]
pub enum GateInterrupt {
    /// The execution's stop signal fired during a wait.
    Stopped,
    /// A gate query failed; surfaced as a hard step failure.
    Store(StoreError),
}

impl From<StoreError> for GateInterrupt {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Evaluates the three cross-execution wait predicates for one step.
pub struct DependencyGate<'a> {
    store: &'a dyn AttemptStore,
    config: &'a EngineConfig,
}

impl<'a> DependencyGate<'a> {
    pub fn new(store: &'a dyn AttemptStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Block until every active predicate clears, the duplicate policy fires,
    /// or the stop signal interrupts a wait.
    ///
    /// Order: duplicates (per policy), then steps elsewhere that depend on
    /// this one, then (dependency-mode executions only) the steps this one
    /// depends on.
    pub async fn wait_for_clearance(
        &self,
        step: &StepDefinition,
        key: AttemptKey,
        stop: &StopSignal,
    ) -> Result<GateDecision, GateInterrupt> {
        match self.check_duplicates(step, key, stop).await? {
            GateDecision::Duplicate => return Ok(GateDecision::Duplicate),
            GateDecision::Proceed => {}
        }
        self.wait_for_dependants(key, stop).await?;
        self.wait_for_dependencies(step, key, stop).await?;
        Ok(GateDecision::Proceed)
    }

    async fn check_duplicates(
        &self,
        step: &StepDefinition,
        key: AttemptKey,
        stop: &StopSignal,
    ) -> Result<GateDecision, GateInterrupt> {
        if step.duplicate_policy == DuplicatePolicy::Allow {
            return Ok(GateDecision::Proceed);
        }

        let mut announced = false;
        loop {
            let since = chrono::Utc::now() - self.config.duplicate_window();
            let duplicates = self
                .store
                .active_duplicate_attempts(key.step_id, key.execution_id, since)
                .await?;
            if duplicates.is_empty() {
                return Ok(GateDecision::Proceed);
            }

            if step.duplicate_policy == DuplicatePolicy::Fail {
                debug!(
                    step_id = key.step_id,
                    blocking_execution = duplicates[0].execution_id,
                    "duplicate policy is fail, finishing as duplicate"
                );
                return Ok(GateDecision::Duplicate);
            }

            if !announced {
                announced = true;
                info!(
                    step_id = key.step_id,
                    duplicates = duplicates.len(),
                    "waiting for duplicate attempts under other executions"
                );
                self.announce(key, "waiting for a duplicate attempt under another execution")
                    .await;
            }
            self.pause(stop).await?;
        }
    }

    /// Steps elsewhere that depend on this step hold it back regardless of
    /// this execution's own mode, so this step never races ahead of a
    /// consumer already running under a dependency-mode execution.
    async fn wait_for_dependants(
        &self,
        key: AttemptKey,
        stop: &StopSignal,
    ) -> Result<(), GateInterrupt> {
        let mut announced = false;
        loop {
            let dependants = self
                .store
                .active_dependant_attempts(key.step_id, key.execution_id)
                .await?;
            if dependants.is_empty() {
                return Ok(());
            }
            if !announced {
                announced = true;
                info!(
                    step_id = key.step_id,
                    dependants = dependants.len(),
                    "waiting for dependant steps running under other executions"
                );
                self.announce(key, "waiting for dependant steps under other executions")
                    .await;
            }
            self.pause(stop).await?;
        }
    }

    async fn wait_for_dependencies(
        &self,
        step: &StepDefinition,
        key: AttemptKey,
        stop: &StopSignal,
    ) -> Result<(), GateInterrupt> {
        if step.dependencies.is_empty() {
            return Ok(());
        }
        let dependency_mode = self
            .store
            .execution_dependency_mode(key.execution_id)
            .await?;
        if !dependency_mode {
            return Ok(());
        }

        let dependency_ids: Vec<i64> = step.dependency_ids().collect();
        let mut announced = false;
        loop {
            let blockers = self
                .store
                .active_dependency_attempts(&dependency_ids, key.execution_id)
                .await?;
            if blockers.is_empty() {
                return Ok(());
            }
            if !announced {
                announced = true;
                info!(
                    step_id = key.step_id,
                    blockers = blockers.len(),
                    "waiting for dependency steps running under other executions"
                );
                self.announce(key, "waiting for dependency steps under other executions")
                    .await;
            }
            self.pause(stop).await?;
        }
    }

    /// Info-message breadcrumb on the attempt; a failure to write it never
    /// disturbs the wait.
    async fn announce(&self, key: AttemptKey, text: &str) {
        let _ = self
            .store
            .append_message(key, MessageChannel::Info, text)
            .await;
    }

    async fn pause(&self, stop: &StopSignal) -> Result<(), GateInterrupt> {
        tokio::select! {
            _ = stop.triggered() => Err(GateInterrupt::Stopped),
            _ = tokio::time::sleep(self.config.polling_interval()) => Ok(()),
        }
    }
}
