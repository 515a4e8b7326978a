//! Step-execution orchestration.
//!
//! [`StepOrchestrator`] exposes the engine's one operation: run a step
//! execution to a terminal attempt outcome under a stop signal. It sequences
//! pre-flight evaluation, the cross-execution [`DependencyGate`], and the
//! [`RetryCoordinator`]'s attempt-chain loop, persisting every transition
//! through the [`crate::store::AttemptStore`].

pub mod dependency_gate;
pub mod retry;
pub mod step_orchestrator;

pub use dependency_gate::{DependencyGate, GateDecision, GateInterrupt};
pub use retry::RetryCoordinator;
pub use step_orchestrator::{OrchestrationError, StepOrchestrator};
