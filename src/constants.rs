//! # Engine Constants
//!
//! Tuning defaults and event names that define the operational boundaries of
//! the step orchestration engine. Per-step knobs (timeout, retry count, retry
//! interval, duplicate policy) live on [`crate::models::StepDefinition`]; the
//! values here are engine-wide defaults that [`crate::config::EngineConfig`]
//! starts from.

/// Default interval between polls of an external system or of the shared
/// store during duplicate/dependency waits.
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 10_000;

/// Bounded retry applied around transient poll failures before the failure
/// is surfaced to the attempt.
pub const DEFAULT_POLL_FAILURE_RETRY_LIMIT: u32 = 3;

/// Delay between the bounded poll-failure retries.
pub const DEFAULT_POLL_FAILURE_BACKOFF_MS: u64 = 5_000;

/// Captured remote output (logs, result payloads) is truncated to this many
/// bytes before it is persisted, to bound attempt row growth.
pub const DEFAULT_MAX_CAPTURED_OUTPUT_BYTES: usize = 512 * 1024;

/// Marker prepended to captured output that was cut at the size cap.
pub const TRUNCATION_MARKER: &str = "[output truncated] ";

/// How far back the duplicate check looks for active attempts of the same
/// step under other executions.
pub const DEFAULT_DUPLICATE_WINDOW_HOURS: i64 = 24;

/// Lifecycle events published on the [`crate::events::EventPublisher`].
pub mod events {
    pub const ATTEMPT_CREATED: &str = "attempt.created";
    pub const ATTEMPT_RUNNING: &str = "attempt.running";
    pub const ATTEMPT_SUCCEEDED: &str = "attempt.succeeded";
    pub const ATTEMPT_WARNING: &str = "attempt.warning";
    pub const ATTEMPT_FAILED: &str = "attempt.failed";
    pub const ATTEMPT_STOPPED: &str = "attempt.stopped";
    pub const ATTEMPT_SKIPPED: &str = "attempt.skipped";
    pub const ATTEMPT_DUPLICATE: &str = "attempt.duplicate";
    pub const ATTEMPT_RETRY_SCHEDULED: &str = "attempt.retry_scheduled";
}
