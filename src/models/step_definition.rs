use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::parameter::{ConditionParameter, Parameter};
use super::step_payload::StepPayload;

/// What to do when another live attempt of the same step already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Run regardless of concurrent attempts.
    Allow,
    /// Hold in the gate until the other attempt settles.
    #[default]
    Wait,
    /// Finish immediately with the `Duplicate` terminal status.
    Fail,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Wait => write!(f, "wait"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("step {step_id} cannot depend on itself")]
pub struct SelfDependency {
    pub step_id: i64,
}

/// Edge in the job's step dependency graph: `step_id` runs after
/// `depends_on_step_id`. Self-loops are rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    step_id: i64,
    depends_on_step_id: i64,
}

impl DependencyEdge {
    pub fn new(step_id: i64, depends_on_step_id: i64) -> Result<Self, SelfDependency> {
        if step_id == depends_on_step_id {
            return Err(SelfDependency { step_id });
        }
        Ok(Self {
            step_id,
            depends_on_step_id,
        })
    }

    pub fn step_id(&self) -> i64 {
        self.step_id
    }

    pub fn depends_on_step_id(&self) -> i64 {
        self.depends_on_step_id
    }
}

/// Static definition of a step: what to run, how long to let it run, how
/// often to retry it, and the conditions under which it runs at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_id: i64,
    pub job_id: i64,
    pub name: String,
    /// Additional tries after the first attempt fails. Zero disables retry.
    pub retry_attempts: i32,
    pub retry_interval_minutes: i32,
    /// Zero or negative disables the timeout.
    pub timeout_minutes: i32,
    pub duplicate_policy: DuplicatePolicy,
    /// Expression that must evaluate truthy for the step to run; absent
    /// means the step always runs.
    pub execution_condition: Option<String>,
    pub condition_parameters: Vec<ConditionParameter>,
    pub parameters: Vec<Parameter>,
    pub dependencies: Vec<DependencyEdge>,
    pub payload: StepPayload,
}

impl StepDefinition {
    /// Minimal definition with retry and timeout disabled; fields are public
    /// so call sites set what they need.
    pub fn new(step_id: i64, job_id: i64, name: impl Into<String>, payload: StepPayload) -> Self {
        Self {
            step_id,
            job_id,
            name: name.into(),
            retry_attempts: 0,
            retry_interval_minutes: 0,
            timeout_minutes: 0,
            duplicate_policy: DuplicatePolicy::default(),
            execution_condition: None,
            condition_parameters: Vec::new(),
            parameters: Vec::new(),
            dependencies: Vec::new(),
            payload,
        }
    }

    /// Wall-clock budget for one attempt, `None` when unlimited.
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_minutes > 0 {
            Some(Duration::from_secs(self.timeout_minutes as u64 * 60))
        } else {
            None
        }
    }

    /// Delay between a failed attempt and its successor.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_minutes.max(0) as u64 * 60)
    }

    /// Whether another attempt may follow one at `retry_index`.
    pub fn can_retry_from(&self, retry_index: i32) -> bool {
        retry_index < self.retry_attempts
    }

    pub fn dependency_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.dependencies.iter().map(|edge| edge.depends_on_step_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::step_payload::{ProcessStepConfig, StepPayload};

    fn process_payload() -> StepPayload {
        StepPayload::Process(ProcessStepConfig {
            program: "/bin/true".into(),
            arguments: vec![],
            working_directory: None,
        })
    }

    #[test]
    fn self_dependency_is_rejected() {
        assert_eq!(
            DependencyEdge::new(5, 5),
            Err(SelfDependency { step_id: 5 })
        );
        assert!(DependencyEdge::new(5, 6).is_ok());
    }

    #[test]
    fn zero_timeout_means_unlimited() {
        let mut step = StepDefinition::new(1, 1, "load", process_payload());
        assert_eq!(step.timeout(), None);
        step.timeout_minutes = 30;
        assert_eq!(step.timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn retry_budget_counts_additional_tries() {
        let mut step = StepDefinition::new(1, 1, "load", process_payload());
        assert!(!step.can_retry_from(0));

        step.retry_attempts = 2;
        assert!(step.can_retry_from(0));
        assert!(step.can_retry_from(1));
        assert!(!step.can_retry_from(2));
    }
}
