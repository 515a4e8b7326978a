use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::state_machine::Status;

/// Identity of one attempt: exactly one attempt exists per key, and attempts
/// for a step form a singly-linked retry chain ordered by `retry_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptKey {
    pub execution_id: i64,
    pub step_id: i64,
    /// 0-based, monotonically increasing per retry.
    pub retry_index: i32,
}

impl AttemptKey {
    /// Key of the first attempt of a step within an execution.
    pub fn first(execution_id: i64, step_id: i64) -> Self {
        Self {
            execution_id,
            step_id,
            retry_index: 0,
        }
    }

    /// Key of the successor attempt in the retry chain.
    pub fn successor(&self) -> Self {
        Self {
            execution_id: self.execution_id,
            step_id: self.step_id,
            retry_index: self.retry_index + 1,
        }
    }

    pub fn is_first(&self) -> bool {
        self.retry_index == 0
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "execution {} step {} attempt {}",
            self.execution_id, self.step_id, self.retry_index
        )
    }
}

/// The three diagnostic channels persisted per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Per-attempt diagnostic messages, kept per channel.
///
/// Message buffers belong to a single attempt. A retry starts with a fresh
/// set; output from a prior attempt must never leak into its successor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSet {
    pub info: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, channel: MessageChannel, text: impl Into<String>) {
        match channel {
            MessageChannel::Info => self.info.push(text.into()),
            MessageChannel::Warning => self.warnings.push(text.into()),
            MessageChannel::Error => self.errors.push(text.into()),
        }
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.info.push(text.into());
    }

    pub fn warning(&mut self, text: impl Into<String>) {
        self.warnings.push(text.into());
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.errors.push(text.into());
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.info.is_empty() && self.warnings.is_empty() && self.errors.is_empty()
    }

    /// Move every message of `other` into self, preserving channel.
    pub fn absorb(&mut self, other: MessageSet) {
        self.info.extend(other.info);
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }
}

/// External system's identifier for the submitted unit of work (run id, job
/// run id, process id, orchestration instance id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationHandle(String);

impl CorrelationHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Request to create a new attempt row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttempt {
    pub key: AttemptKey,
    pub status: Status,
}

impl NewAttempt {
    /// First attempt of a step, not yet dispatched.
    pub fn initial(execution_id: i64, step_id: i64) -> Self {
        Self {
            key: AttemptKey::first(execution_id, step_id),
            status: Status::NotStarted,
        }
    }

    /// Successor attempt scheduled by the retry coordinator.
    pub fn retry_of(previous: &AttemptKey) -> Self {
        Self {
            key: previous.successor(),
            status: Status::AwaitingRetry,
        }
    }
}

/// One persisted try of a step within one execution.
///
/// Mutated only through the store's field-scoped updates; immutable once a
/// terminal status is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub key: AttemptKey,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Actor that requested the stop, recorded when the attempt is `Stopped`.
    pub stopped_by: Option<String>,
    pub correlation_handle: Option<CorrelationHandle>,
    pub messages: MessageSet,
    /// Captured remote output, truncated to the configured cap.
    pub output: Option<Value>,
}

impl AttemptRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Field-scoped status update: only `Some` fields are written, so concurrent
/// writers touching different attempts (or different fields) never conflict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: Status,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stopped_by: Option<String>,
    pub output: Option<Value>,
}

impl StatusUpdate {
    pub fn to(status: Status) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }

    pub fn ended_now(mut self) -> Self {
        self.ended_at = Some(Utc::now());
        self
    }

    pub fn stopped_by(mut self, actor: impl Into<String>) -> Self {
        self.stopped_by = Some(actor.into());
        self
    }

    pub fn with_output(mut self, output: Option<Value>) -> Self {
        self.output = output;
        self
    }
}

/// The complete observable result of one attempt, assembled by value inside
/// the runner/orchestrator and persisted in one finalization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub status: Status,
    pub messages: MessageSet,
    pub output: Option<Value>,
}

impl AttemptOutcome {
    /// Successful run: `Warning` iff at least one warning was recorded,
    /// otherwise `Succeeded`. Warnings never fail a step.
    pub fn succeeded(messages: MessageSet, output: Option<Value>) -> Self {
        let status = if messages.has_warnings() {
            Status::Warning
        } else {
            Status::Succeeded
        };
        Self {
            status,
            messages,
            output,
        }
    }

    pub fn failed(messages: MessageSet, output: Option<Value>) -> Self {
        Self {
            status: Status::Failed,
            messages,
            output,
        }
    }

    pub fn stopped(messages: MessageSet) -> Self {
        Self {
            status: Status::Stopped,
            messages,
            output: None,
        }
    }

    pub fn skipped(messages: MessageSet) -> Self {
        Self {
            status: Status::Skipped,
            messages,
            output: None,
        }
    }

    pub fn duplicate(messages: MessageSet) -> Self {
        Self {
            status: Status::Duplicate,
            messages,
            output: None,
        }
    }

    /// Failure that still has retries available; the coordinator maps this to
    /// the `Retry`/`AwaitingRetry` bridge.
    pub fn is_retryable_failure(&self) -> bool {
        self.status == Status::Failed
    }
}

/// Terminal classification of a whole execution, polled by the sub-job
/// runner against this engine's own store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Warning,
    Failed,
    Stopped,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Warning)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Warning => write!(f, "warning"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid execution outcome: '{0}'")]
pub struct InvalidExecutionOutcome(String);

impl std::str::FromStr for ExecutionOutcome {
    type Err = InvalidExecutionOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "warning" => Ok(Self::Warning),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(InvalidExecutionOutcome(other.to_string())),
        }
    }
}
