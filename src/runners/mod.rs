//! Step runners: one generic start/poll/cancel driver plus a thin adapter per
//! step kind.
//!
//! Adapters own two things only: the client trait abstracting their external
//! system and the mapping from that system's status into [`PollOutcome`]. All
//! polling, timeout arming, cancellation, bounded poll retry, and output
//! capping live in [`driver`], written once.

pub mod agent_job;
pub mod app_reload;
pub mod cluster_job;
pub mod dbt;
pub mod driver;
pub mod durable_function;
pub mod http_function;
pub mod notebook;
pub mod output;
pub mod package;
pub mod pipeline;
pub mod process;
pub mod sql;
pub mod subjob;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::cancellation::StopSignal;
use crate::config::EngineConfig;
use crate::models::{
    AttemptKey, CorrelationHandle, MessageSet, ParameterBindings, StepDefinition, StepKind,
    StepPayload,
};
use crate::store::StoreError;

pub use agent_job::{AgentJobClient, AgentJobRun};
pub use app_reload::{AppReload, AppReloadClient};
pub use cluster_job::{ClusterJobClient, ClusterJobRun};
pub use dbt::{DbtClient, DbtJobRun};
pub use driver::{drive_direct, drive_external};
pub use durable_function::{DurableFunctionClient, DurableOrchestration};
pub use http_function::{HttpFunctionCall, HttpFunctionClient};
pub use notebook::{NotebookClient, NotebookRun};
pub use output::truncate_output;
pub use package::{PackageClient, PackageRun};
pub use pipeline::{PipelineClient, PipelineRun};
pub use process::{ProcessLauncher, ProcessRun, TokioProcessLauncher};
pub use sql::{SqlClient, SqlStatement};
pub use subjob::{ExecutorLauncher, SubJobRun};

/// Everything an adapter may read while running one attempt.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub step: &'a StepDefinition,
    pub key: AttemptKey,
    pub bindings: &'a ParameterBindings,
    pub config: &'a EngineConfig,
    pub stop: &'a StopSignal,
}

impl StepContext<'_> {
    pub fn kind(&self) -> StepKind {
        self.step.payload.kind()
    }

    /// Actor of a stop request, if one has been recorded.
    pub fn stop_actor(&self) -> Option<String> {
        self.stop.actor()
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{kind} step is misconfigured: {reason}")]
    Configuration { kind: StepKind, reason: String },

    #[error("no {kind} client is configured")]
    ClientMissing { kind: StepKind },

    #[error("{system}: {reason}")]
    External { system: &'static str, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RunnerError {
    pub fn configuration(kind: StepKind, reason: impl Into<String>) -> Self {
        Self::Configuration {
            kind,
            reason: reason.into(),
        }
    }

    pub fn external(system: &'static str, reason: impl Into<String>) -> Self {
        Self::External {
            system,
            reason: reason.into(),
        }
    }
}

/// How the remote system classified its own finished unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDisposition {
    Succeeded,
    Failed,
    /// Cancelled on the remote side without this engine asking for it.
    Cancelled,
}

/// Terminal result reported by the external system, by value.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOutcome {
    pub disposition: RemoteDisposition,
    pub output: Option<Value>,
    pub messages: MessageSet,
}

impl RemoteOutcome {
    pub fn succeeded(output: Option<Value>) -> Self {
        Self {
            disposition: RemoteDisposition::Succeeded,
            output,
            messages: MessageSet::new(),
        }
    }

    pub fn failed(reason: impl Into<String>, output: Option<Value>) -> Self {
        let mut messages = MessageSet::new();
        messages.error(reason);
        Self {
            disposition: RemoteDisposition::Failed,
            output,
            messages,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        let mut messages = MessageSet::new();
        messages.error(reason);
        Self {
            disposition: RemoteDisposition::Cancelled,
            output: None,
            messages,
        }
    }
}

/// One poll of the external system.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Terminal(RemoteOutcome),
}

/// Status vocabulary shared by the polled clients. Client implementations
/// translate their system's wire states into this; adapters translate it
/// into [`PollOutcome`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteJobStatus {
    Queued,
    Running,
    Succeeded { output: Option<Value> },
    Failed { reason: String, output: Option<Value> },
    Cancelled,
}

impl RemoteJobStatus {
    pub fn into_poll_outcome(self) -> PollOutcome {
        match self {
            Self::Queued | Self::Running => PollOutcome::Pending,
            Self::Succeeded { output } => PollOutcome::Terminal(RemoteOutcome::succeeded(output)),
            Self::Failed { reason, output } => {
                PollOutcome::Terminal(RemoteOutcome::failed(reason, output))
            }
            Self::Cancelled => PollOutcome::Terminal(RemoteOutcome::cancelled(
                "cancelled in the external system",
            )),
        }
    }
}

/// A unit of work that is started remotely and tracked by polling.
#[async_trait]
pub trait ExternalJob: Send + Sync {
    /// Submit the unit of work. Called exactly once per attempt.
    async fn start(&self, ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError>;

    /// Ask the external system where the work stands.
    async fn poll(
        &self,
        ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<PollOutcome, RunnerError>;

    /// Best-effort remote cancellation. Called at most once per attempt.
    async fn cancel(
        &self,
        ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError>;

    /// Short human label used in messages and logs.
    fn describe(&self) -> &'static str;
}

/// A unit of work completed by a single remote call: no handle, no poll loop,
/// but the same timeout and cancellation regime.
#[async_trait]
pub trait DirectCall: Send + Sync {
    async fn invoke(&self, ctx: &StepContext<'_>) -> Result<RemoteOutcome, RunnerError>;

    fn describe(&self) -> &'static str;
}

/// Resolved runner for one step.
#[derive(Clone)]
pub enum StepRunner {
    External(Arc<dyn ExternalJob>),
    Direct(Arc<dyn DirectCall>),
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::External(job) => f.debug_tuple("External").field(&job.describe()).finish(),
            Self::Direct(call) => f.debug_tuple("Direct").field(&call.describe()).finish(),
        }
    }
}

/// Holds the configured clients and resolves a [`StepPayload`] to its runner.
///
/// Every client is optional except the process launcher, which defaults to
/// [`TokioProcessLauncher`]. Resolving a payload whose client is absent is a
/// configuration error, reported before any attempt starts.
#[derive(Clone)]
pub struct RunnerRegistry {
    sql: Option<Arc<dyn SqlClient>>,
    agent_job: Option<Arc<dyn AgentJobClient>>,
    package: Option<Arc<dyn PackageClient>>,
    pipeline: Option<Arc<dyn PipelineClient>>,
    cluster_job: Option<Arc<dyn ClusterJobClient>>,
    dbt: Option<Arc<dyn DbtClient>>,
    app_reload: Option<Arc<dyn AppReloadClient>>,
    notebook: Option<Arc<dyn NotebookClient>>,
    http_function: Option<Arc<dyn HttpFunctionClient>>,
    durable_function: Option<Arc<dyn DurableFunctionClient>>,
    process_launcher: Arc<dyn ProcessLauncher>,
    executor_launcher: Option<Arc<dyn ExecutorLauncher>>,
}

impl RunnerRegistry {
    pub fn builder() -> RunnerRegistryBuilder {
        RunnerRegistryBuilder::default()
    }

    /// Resolve the runner for `payload`, or fail fast when its client is not
    /// configured.
    pub fn resolve(&self, payload: &StepPayload) -> Result<StepRunner, RunnerError> {
        let kind = payload.kind();
        let missing = || RunnerError::ClientMissing { kind };

        Ok(match payload {
            StepPayload::Sql(config) => {
                let client = self.sql.clone().ok_or_else(missing)?;
                StepRunner::Direct(Arc::new(SqlStatement::new(client, config.clone())))
            }
            StepPayload::AgentJob(config) => {
                let client = self.agent_job.clone().ok_or_else(missing)?;
                StepRunner::External(Arc::new(AgentJobRun::new(client, config.clone())))
            }
            StepPayload::Package(config) => {
                let client = self.package.clone().ok_or_else(missing)?;
                StepRunner::External(Arc::new(PackageRun::new(client, config.clone())))
            }
            StepPayload::Pipeline(config) => {
                let client = self.pipeline.clone().ok_or_else(missing)?;
                StepRunner::External(Arc::new(PipelineRun::new(client, config.clone())))
            }
            StepPayload::ClusterJob(config) => {
                let client = self.cluster_job.clone().ok_or_else(missing)?;
                StepRunner::External(Arc::new(ClusterJobRun::new(client, config.clone())))
            }
            StepPayload::DbtJob(config) => {
                let client = self.dbt.clone().ok_or_else(missing)?;
                StepRunner::External(Arc::new(DbtJobRun::new(client, config.clone())))
            }
            StepPayload::AppReload(config) => {
                let client = self.app_reload.clone().ok_or_else(missing)?;
                StepRunner::External(Arc::new(AppReload::new(client, config.clone())))
            }
            StepPayload::Notebook(config) => {
                let client = self.notebook.clone().ok_or_else(missing)?;
                StepRunner::External(Arc::new(NotebookRun::new(client, config.clone())))
            }
            StepPayload::HttpFunction(config) => {
                let client = self.http_function.clone().ok_or_else(missing)?;
                StepRunner::Direct(Arc::new(HttpFunctionCall::new(client, config.clone())))
            }
            StepPayload::DurableFunction(config) => {
                let client = self.durable_function.clone().ok_or_else(missing)?;
                StepRunner::External(Arc::new(DurableOrchestration::new(client, config.clone())))
            }
            StepPayload::Process(config) => StepRunner::External(Arc::new(ProcessRun::new(
                self.process_launcher.clone(),
                config.clone(),
            ))),
            StepPayload::SubJob(config) => {
                let launcher = self.executor_launcher.clone().ok_or_else(missing)?;
                StepRunner::External(Arc::new(SubJobRun::new(launcher, config.clone())))
            }
        })
    }
}

pub struct RunnerRegistryBuilder {
    sql: Option<Arc<dyn SqlClient>>,
    agent_job: Option<Arc<dyn AgentJobClient>>,
    package: Option<Arc<dyn PackageClient>>,
    pipeline: Option<Arc<dyn PipelineClient>>,
    cluster_job: Option<Arc<dyn ClusterJobClient>>,
    dbt: Option<Arc<dyn DbtClient>>,
    app_reload: Option<Arc<dyn AppReloadClient>>,
    notebook: Option<Arc<dyn NotebookClient>>,
    http_function: Option<Arc<dyn HttpFunctionClient>>,
    durable_function: Option<Arc<dyn DurableFunctionClient>>,
    process_launcher: Arc<dyn ProcessLauncher>,
    executor_launcher: Option<Arc<dyn ExecutorLauncher>>,
}

impl Default for RunnerRegistryBuilder {
    fn default() -> Self {
        Self {
            sql: None,
            agent_job: None,
            package: None,
            pipeline: None,
            cluster_job: None,
            dbt: None,
            app_reload: None,
            notebook: None,
            http_function: None,
            durable_function: None,
            process_launcher: Arc::new(TokioProcessLauncher::new()),
            executor_launcher: None,
        }
    }
}

impl RunnerRegistryBuilder {
    pub fn with_sql(mut self, client: Arc<dyn SqlClient>) -> Self {
        self.sql = Some(client);
        self
    }

    pub fn with_agent_job(mut self, client: Arc<dyn AgentJobClient>) -> Self {
        self.agent_job = Some(client);
        self
    }

    pub fn with_package(mut self, client: Arc<dyn PackageClient>) -> Self {
        self.package = Some(client);
        self
    }

    pub fn with_pipeline(mut self, client: Arc<dyn PipelineClient>) -> Self {
        self.pipeline = Some(client);
        self
    }

    pub fn with_cluster_job(mut self, client: Arc<dyn ClusterJobClient>) -> Self {
        self.cluster_job = Some(client);
        self
    }

    pub fn with_dbt(mut self, client: Arc<dyn DbtClient>) -> Self {
        self.dbt = Some(client);
        self
    }

    pub fn with_app_reload(mut self, client: Arc<dyn AppReloadClient>) -> Self {
        self.app_reload = Some(client);
        self
    }

    pub fn with_notebook(mut self, client: Arc<dyn NotebookClient>) -> Self {
        self.notebook = Some(client);
        self
    }

    pub fn with_http_function(mut self, client: Arc<dyn HttpFunctionClient>) -> Self {
        self.http_function = Some(client);
        self
    }

    pub fn with_durable_function(mut self, client: Arc<dyn DurableFunctionClient>) -> Self {
        self.durable_function = Some(client);
        self
    }

    pub fn with_process_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.process_launcher = launcher;
        self
    }

    pub fn with_executor_launcher(mut self, launcher: Arc<dyn ExecutorLauncher>) -> Self {
        self.executor_launcher = Some(launcher);
        self
    }

    pub fn build(self) -> RunnerRegistry {
        RunnerRegistry {
            sql: self.sql,
            agent_job: self.agent_job,
            package: self.package,
            pipeline: self.pipeline,
            cluster_job: self.cluster_job,
            dbt: self.dbt,
            app_reload: self.app_reload,
            notebook: self.notebook,
            http_function: self.http_function,
            durable_function: self.durable_function,
            process_launcher: self.process_launcher,
            executor_launcher: self.executor_launcher,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubJobStepConfig;

    #[test]
    fn unconfigured_kind_is_a_client_missing_error() {
        let registry = RunnerRegistry::builder().build();
        let payload = StepPayload::SubJob(SubJobStepConfig {
            job_id: 1,
            wait_for_completion: true,
        });
        let err = registry.resolve(&payload).unwrap_err();
        assert!(matches!(
            err,
            RunnerError::ClientMissing {
                kind: StepKind::SubJob
            }
        ));
    }

    #[test]
    fn process_steps_resolve_without_configuration() {
        let registry = RunnerRegistry::builder().build();
        let payload = StepPayload::Process(crate::models::ProcessStepConfig {
            program: "/bin/true".into(),
            arguments: vec![],
            working_directory: None,
        });
        assert!(matches!(
            registry.resolve(&payload),
            Ok(StepRunner::External(_))
        ));
    }

    #[test]
    fn remote_status_maps_to_poll_outcomes() {
        assert_eq!(
            RemoteJobStatus::Queued.into_poll_outcome(),
            PollOutcome::Pending
        );
        assert_eq!(
            RemoteJobStatus::Running.into_poll_outcome(),
            PollOutcome::Pending
        );

        let done = RemoteJobStatus::Succeeded { output: None }.into_poll_outcome();
        assert!(matches!(
            done,
            PollOutcome::Terminal(RemoteOutcome {
                disposition: RemoteDisposition::Succeeded,
                ..
            })
        ));

        let failed = RemoteJobStatus::Failed {
            reason: "quota exceeded".into(),
            output: None,
        }
        .into_poll_outcome();
        match failed {
            PollOutcome::Terminal(outcome) => {
                assert_eq!(outcome.disposition, RemoteDisposition::Failed);
                assert_eq!(outcome.messages.errors, vec!["quota exceeded"]);
            }
            PollOutcome::Pending => panic!("failed status must be terminal"),
        }
    }
}
