//! Cooperative cancellation for step attempts.
//!
//! Two inputs can interrupt an attempt: an execution-wide stop request and
//! the step's own wall-clock timeout. [`StopSignal`] carries the stop request
//! with actor attribution; [`StepCancellation`] combines it with a deadline
//! armed only after remote submission succeeds, so startup latency never
//! counts against the budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an attempt was interrupted. On a race between the two, the timeout
/// wins so the attempt fails rather than reporting a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The step's wall-clock budget elapsed.
    Timeout,
    /// A stop was requested for the execution.
    Stop,
}

/// Execution-wide stop request shared by every step task of an execution.
///
/// Cloning is cheap; all clones observe the same trigger. The first trigger
/// records the requesting actor and later triggers keep it.
#[derive(Debug, Clone)]
pub struct StopSignal {
    token: CancellationToken,
    actor: Arc<RwLock<Option<String>>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            actor: Arc::new(RwLock::new(None)),
        }
    }

    /// Request a stop on behalf of `actor`. Idempotent.
    pub fn trigger(&self, actor: impl Into<String>) {
        {
            let mut slot = self.actor.write();
            if slot.is_none() {
                *slot = Some(actor.into());
            }
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Actor recorded by the first trigger, if any.
    pub fn actor(&self) -> Option<String> {
        self.actor.read().clone()
    }

    /// Resolves once a stop has been requested.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel scope of one attempt: the execution's stop signal plus an optional
/// timeout deadline.
///
/// The deadline is tracked as a point in time instead of a spawned timer, so
/// dropping the scope leaks nothing and arming is a plain field write.
#[derive(Debug)]
pub struct StepCancellation {
    stop: StopSignal,
    deadline: Option<Instant>,
}

impl StepCancellation {
    pub fn new(stop: StopSignal) -> Self {
        Self {
            stop,
            deadline: None,
        }
    }

    /// Scope without a stop signal, for callers that only need the timeout.
    pub fn unstoppable() -> Self {
        Self::new(StopSignal::new())
    }

    /// Start the wall-clock budget now. Called once remote submission has
    /// succeeded; never before.
    pub fn arm_timeout(&mut self, budget: Duration) {
        self.deadline = Some(Instant::now() + budget);
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn deadline_elapsed(&self) -> bool {
        self.deadline
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Cancellation already in effect, without waiting. Deadline is checked
    /// before the stop signal.
    pub fn cause(&self) -> Option<CancelCause> {
        if self.deadline_elapsed() {
            Some(CancelCause::Timeout)
        } else if self.stop.is_triggered() {
            Some(CancelCause::Stop)
        } else {
            None
        }
    }

    /// Resolves when either input fires; pends forever while neither does.
    pub async fn cancelled(&self) -> CancelCause {
        tokio::select! {
            biased;
            _ = Self::deadline_reached(self.deadline) => CancelCause::Timeout,
            _ = self.stop.triggered() => {
                if self.deadline_elapsed() {
                    CancelCause::Timeout
                } else {
                    CancelCause::Stop
                }
            }
        }
    }

    /// Drive `work` to completion unless the scope cancels first.
    pub async fn checked<F>(&self, work: F) -> Result<F::Output, CancelCause>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            cause = self.cancelled() => Err(cause),
            output = work => Ok(output),
        }
    }

    /// Interruptible sleep; `Err` carries the cause that cut it short.
    pub async fn pause(&self, duration: Duration) -> Result<(), CancelCause> {
        self.checked(tokio::time::sleep(duration)).await
    }

    async fn deadline_reached(deadline: Option<Instant>) {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}
