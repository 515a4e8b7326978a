pub mod attempt;
pub mod parameter;
pub mod step_definition;
pub mod step_payload;

// Re-export core models for easy access
pub use attempt::{
    AttemptKey, AttemptOutcome, AttemptRecord, CorrelationHandle, ExecutionOutcome,
    InvalidExecutionOutcome, MessageChannel, MessageSet, NewAttempt, StatusUpdate,
};
pub use parameter::{ConditionParameter, Parameter, ParameterBindings};
pub use step_definition::{DependencyEdge, DuplicatePolicy, SelfDependency, StepDefinition};
pub use step_payload::{
    AgentJobStepConfig, AppReloadStepConfig, ClusterJobStepConfig, DbtJobStepConfig,
    DurableFunctionStepConfig, HttpFunctionStepConfig, NotebookStepConfig, PackageStepConfig,
    PipelineStepConfig, ProcessStepConfig, SqlStepConfig, StepKind, StepPayload, SubJobStepConfig,
};
