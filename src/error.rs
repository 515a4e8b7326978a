//! Top-level error type aggregating the engine's failure domains.
//!
//! Inside a step task nothing bubbles past the orchestrator; this type is for
//! embedders wiring the engine together (configuration, store setup) and for
//! call sites that cross module boundaries.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::expression::ExpressionError;
use crate::orchestration::OrchestrationError;
use crate::runners::RunnerError;
use crate::state_machine::InvalidStatus;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Status(#[from] InvalidStatus),
}

pub type Result<T> = std::result::Result<T, Error>;
