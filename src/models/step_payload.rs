//! Per-kind step configuration.
//!
//! Each variant carries exactly the fields its runner needs to start and
//! track the remote unit of work. Connection and service ids are resolved by
//! the embedding application; the engine treats them as opaque references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of a step's payload, used for registry lookup and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Sql,
    AgentJob,
    Package,
    Pipeline,
    ClusterJob,
    DbtJob,
    AppReload,
    Notebook,
    HttpFunction,
    DurableFunction,
    Process,
    SubJob,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sql => "sql",
            Self::AgentJob => "agent_job",
            Self::Package => "package",
            Self::Pipeline => "pipeline",
            Self::ClusterJob => "cluster_job",
            Self::DbtJob => "dbt_job",
            Self::AppReload => "app_reload",
            Self::Notebook => "notebook",
            Self::HttpFunction => "http_function",
            Self::DurableFunction => "durable_function",
            Self::Process => "process",
            Self::SubJob => "sub_job",
        };
        write!(f, "{name}")
    }
}

/// Kind-specific configuration of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    Sql(SqlStepConfig),
    AgentJob(AgentJobStepConfig),
    Package(PackageStepConfig),
    Pipeline(PipelineStepConfig),
    ClusterJob(ClusterJobStepConfig),
    DbtJob(DbtJobStepConfig),
    AppReload(AppReloadStepConfig),
    Notebook(NotebookStepConfig),
    HttpFunction(HttpFunctionStepConfig),
    DurableFunction(DurableFunctionStepConfig),
    Process(ProcessStepConfig),
    SubJob(SubJobStepConfig),
}

impl StepPayload {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Sql(_) => StepKind::Sql,
            Self::AgentJob(_) => StepKind::AgentJob,
            Self::Package(_) => StepKind::Package,
            Self::Pipeline(_) => StepKind::Pipeline,
            Self::ClusterJob(_) => StepKind::ClusterJob,
            Self::DbtJob(_) => StepKind::DbtJob,
            Self::AppReload(_) => StepKind::AppReload,
            Self::Notebook(_) => StepKind::Notebook,
            Self::HttpFunction(_) => StepKind::HttpFunction,
            Self::DurableFunction(_) => StepKind::DurableFunction,
            Self::Process(_) => StepKind::Process,
            Self::SubJob(_) => StepKind::SubJob,
        }
    }
}

/// Statement executed against a database connection in a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlStepConfig {
    pub connection_id: i64,
    pub statement: String,
    /// Execution parameter that receives the statement's scalar result.
    pub capture_parameter_id: Option<i64>,
}

/// Job run on a database server's scheduling agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentJobStepConfig {
    pub connection_id: i64,
    pub job_name: String,
}

/// Deployed integration package executed by folder/project/package path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageStepConfig {
    pub connection_id: i64,
    pub folder: String,
    pub project: String,
    pub package: String,
    pub use_32bit_runtime: bool,
}

/// Hosted data pipeline started by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStepConfig {
    pub service_id: i64,
    pub pipeline_name: String,
}

/// Job defined on a compute cluster service, addressed by its remote job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterJobStepConfig {
    pub service_id: i64,
    pub job_id: i64,
}

/// Transformation job on a hosted dbt service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbtJobStepConfig {
    pub service_id: i64,
    pub job_id: String,
}

/// Reload of a hosted analytics application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppReloadStepConfig {
    pub service_id: i64,
    pub app_id: String,
}

/// Notebook run inside a hosted workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookStepConfig {
    pub service_id: i64,
    pub workspace_id: String,
    pub notebook_id: String,
}

/// Single HTTP function invocation; the response body is captured as output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFunctionStepConfig {
    pub service_id: i64,
    pub function_name: String,
}

/// Durable orchestration started on a function host and polled to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableFunctionStepConfig {
    pub service_id: i64,
    pub orchestrator_name: String,
}

/// Local operating-system process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStepConfig {
    pub program: String,
    pub arguments: Vec<String>,
    pub working_directory: Option<String>,
}

/// Child execution of another job in this same engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubJobStepConfig {
    pub job_id: i64,
    /// When false the step succeeds as soon as the child execution starts.
    pub wait_for_completion: bool,
}
