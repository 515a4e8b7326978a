#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Stepline Core
//!
//! Step-execution orchestration engine for data-pipeline jobs: the per-step
//! attempt lifecycle state machine (running, retrying, timing out,
//! cancelling, skipping, de-duplicating) and the generic start/poll/cancel
//! pattern every external step kind instantiates.
//!
//! ## Architecture
//!
//! The engine exposes one operation — run a step execution to a terminal
//! attempt outcome under a stop signal — consumed by an external
//! per-execution scheduler that owns dispatch order. Everything the engine
//! shares across concurrent step tasks and concurrent executions goes
//! through the [`store::AttemptStore`]; cross-execution coordination is
//! polled reads against it, never process-to-process messaging.
//!
//! ## Module Organization
//!
//! - [`models`] - Step definitions, payloads, parameters, and attempt records
//! - [`state_machine`] - The attempt [`state_machine::Status`] set and its transition table
//! - [`store`] - Persistence contract plus in-memory and PostgreSQL stores
//! - [`orchestration`] - StepOrchestrator, DependencyGate, RetryCoordinator
//! - [`runners`] - The generic external-job driver and one adapter per step kind
//! - [`cancellation`] - Stop signal and timeout, linked and attributable
//! - [`expression`] - Consumed expression-evaluation contract
//! - [`events`] - Broadcast lifecycle events
//! - [`config`] - Engine-wide knobs with YAML loading
//! - [`test_helpers`] - Programmable fakes for every collaborator contract
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stepline_core::cancellation::StopSignal;
//! use stepline_core::config::EngineConfig;
//! use stepline_core::models::{ProcessStepConfig, StepDefinition, StepPayload};
//! use stepline_core::orchestration::StepOrchestrator;
//! use stepline_core::runners::RunnerRegistry;
//! use stepline_core::store::InMemoryAttemptStore;
//! use stepline_core::test_helpers::FixedEvaluator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryAttemptStore::new());
//! store.register_execution(1, false);
//! let orchestrator = StepOrchestrator::new(
//!     store,
//!     Arc::new(FixedEvaluator::new()),
//!     RunnerRegistry::builder().build(),
//!     EngineConfig::default(),
//! );
//!
//! let step = StepDefinition::new(
//!     1,
//!     1,
//!     "load",
//!     StepPayload::Process(ProcessStepConfig {
//!         program: "/usr/bin/true".into(),
//!         arguments: vec![],
//!         working_directory: None,
//!     }),
//! );
//! let stop = StopSignal::new();
//! let attempt = orchestrator.run_step(&step, 1, &stop).await?;
//! println!("step finished as {}", attempt.status);
//! # Ok(())
//! # }
//! ```

pub mod cancellation;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod expression;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod runners;
pub mod state_machine;
pub mod store;
pub mod test_helpers;

pub use cancellation::{CancelCause, StepCancellation, StopSignal};
pub use error::{Error, Result};
pub use orchestration::{OrchestrationError, StepOrchestrator};
pub use state_machine::Status;
pub use store::AttemptStore;
