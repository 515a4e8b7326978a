use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one step-execution attempt.
///
/// This enum is the single source of truth for the attempt state machine.
/// `Succeeded`, `Warning`, `Failed`, `Stopped`, `Skipped` and `Duplicate` are
/// terminal for an attempt; `Retry` and `AwaitingRetry` are the transient
/// markers that bridge one attempt to the next in a retry chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Attempt exists but has not been dispatched yet
    NotStarted,
    /// The external operation is in flight
    Running,
    /// Successor attempt created, waiting out the retry interval
    AwaitingRetry,
    /// Attempt failed and a successor has been scheduled
    Retry,
    /// Attempt finished successfully with no warnings
    Succeeded,
    /// Attempt finished successfully but recorded at least one warning
    Warning,
    /// Attempt failed (including timeout) with no retries remaining
    Failed,
    /// Attempt was cancelled by an external stop request
    Stopped,
    /// Execution condition evaluated false; the runner was never invoked
    Skipped,
    /// A duplicate was running elsewhere and the policy was `Fail`
    Duplicate,
}

impl Status {
    /// Check if this is a terminal status (the attempt is immutable once a
    /// terminal status is persisted).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Warning
                | Self::Failed
                | Self::Stopped
                | Self::Skipped
                | Self::Duplicate
        )
    }

    /// Check if this status counts as "active" for the cross-execution
    /// duplicate and dependency queries.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingRetry)
    }

    /// Check if this status marks a successful outcome (with or without
    /// warnings).
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Warning)
    }

    /// Check if this attempt is settled: terminal, or superseded by a retry.
    /// Settled attempts accept no further writes of any kind.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || matches!(self, Self::Retry)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::AwaitingRetry => write!(f, "awaiting_retry"),
            Self::Retry => write!(f, "retry"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Warning => write!(f, "warning"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Skipped => write!(f, "skipped"),
            Self::Duplicate => write!(f, "duplicate"),
        }
    }
}

impl std::str::FromStr for Status {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "running" => Ok(Self::Running),
            "awaiting_retry" => Ok(Self::AwaitingRetry),
            "retry" => Ok(Self::Retry),
            "succeeded" => Ok(Self::Succeeded),
            "warning" => Ok(Self::Warning),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            "skipped" => Ok(Self::Skipped),
            "duplicate" => Ok(Self::Duplicate),
            _ => Err(InvalidStatus(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid attempt status: {0}")]
pub struct InvalidStatus(pub String);

/// New attempts start out not started.
impl Default for Status {
    fn default() -> Self {
        Self::NotStarted
    }
}
