//! Local subprocess steps.
//!
//! The start/poll/cancel template degenerates to spawn/wait-for-exit/kill.
//! The correlation handle is the child's pid, which keeps the remote-job
//! discipline intact: the pid is persisted right after spawn, so an operator
//! can find the process if the orchestrator dies mid-attempt.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::models::{CorrelationHandle, ProcessStepConfig};

use super::{ExternalJob, PollOutcome, RemoteOutcome, RunnerError, StepContext};

/// Abstract subprocess surface, a trait so tests can script exits without
/// spawning real processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, config: &ProcessStepConfig) -> Result<CorrelationHandle, RunnerError>;

    /// Non-blocking exit check; `Pending` while the child still runs.
    async fn poll_exit(&self, handle: &CorrelationHandle) -> Result<PollOutcome, RunnerError>;

    async fn kill(&self, handle: &CorrelationHandle) -> Result<(), RunnerError>;
}

/// A child plus the tasks draining its piped output.
///
/// The pipes must be read while the child runs: a child that fills the OS
/// pipe buffer blocks on write and never exits, so `try_wait` would stay
/// `Pending` forever if draining waited for the exit.
struct TrackedChild {
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl TrackedChild {
    fn drain(pipe: impl AsyncRead + Unpin + Send + 'static) -> JoinHandle<Vec<u8>> {
        tokio::spawn(async move {
            let mut pipe = pipe;
            let mut buffer = Vec::new();
            // A read error ends the drain; whatever arrived is kept.
            let _ = pipe.read_to_end(&mut buffer).await;
            buffer
        })
    }

    async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
        match handle {
            Some(task) => match task.await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => String::new(),
            },
            None => String::new(),
        }
    }
}

/// Default launcher over `tokio::process`, tracking children by pid.
#[derive(Default)]
pub struct TokioProcessLauncher {
    children: DashMap<String, Arc<Mutex<TrackedChild>>>,
}

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn child(&self, handle: &CorrelationHandle) -> Result<Arc<Mutex<TrackedChild>>, RunnerError> {
        self.children
            .get(handle.as_str())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                RunnerError::external("process", format!("unknown child pid {handle}"))
            })
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn spawn(&self, config: &ProcessStepConfig) -> Result<CorrelationHandle, RunnerError> {
        let mut command = Command::new(&config.program);
        command
            .args(&config.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(directory) = &config.working_directory {
            command.current_dir(directory);
        }

        let mut child = command.spawn()?;
        let pid = child.id().ok_or_else(|| {
            RunnerError::external("process", "child exited before its pid could be read")
        })?;
        let stdout = child.stdout.take().map(TrackedChild::drain);
        let stderr = child.stderr.take().map(TrackedChild::drain);
        let handle = CorrelationHandle::new(pid.to_string());
        self.children.insert(
            handle.as_str().to_string(),
            Arc::new(Mutex::new(TrackedChild {
                child,
                stdout,
                stderr,
            })),
        );
        Ok(handle)
    }

    async fn poll_exit(&self, handle: &CorrelationHandle) -> Result<PollOutcome, RunnerError> {
        let tracked = self.child(handle)?;
        let mut tracked = tracked.lock().await;
        let Some(status) = tracked.child.try_wait()? else {
            return Ok(PollOutcome::Pending);
        };

        // Exited: the drain tasks hit EOF once the child is gone.
        let stdout = TrackedChild::collect(tracked.stdout.take()).await;
        let stderr = TrackedChild::collect(tracked.stderr.take()).await;
        drop(tracked);
        self.children.remove(handle.as_str());

        let output = Some(json!({ "stdout": stdout, "stderr": stderr }));
        let outcome = if status.success() {
            RemoteOutcome::succeeded(output)
        } else {
            RemoteOutcome::failed(format!("process exited with {status}"), output)
        };
        Ok(PollOutcome::Terminal(outcome))
    }

    async fn kill(&self, handle: &CorrelationHandle) -> Result<(), RunnerError> {
        let tracked = self.child(handle)?;
        tracked.lock().await.child.kill().await?;
        self.children.remove(handle.as_str());
        Ok(())
    }
}

pub struct ProcessRun {
    launcher: Arc<dyn ProcessLauncher>,
    config: ProcessStepConfig,
}

impl ProcessRun {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, config: ProcessStepConfig) -> Self {
        Self { launcher, config }
    }
}

#[async_trait]
impl ExternalJob for ProcessRun {
    async fn start(&self, _ctx: &StepContext<'_>) -> Result<CorrelationHandle, RunnerError> {
        self.launcher.spawn(&self.config).await
    }

    async fn poll(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<PollOutcome, RunnerError> {
        self.launcher.poll_exit(handle).await
    }

    async fn cancel(
        &self,
        _ctx: &StepContext<'_>,
        handle: &CorrelationHandle,
    ) -> Result<(), RunnerError> {
        self.launcher.kill(handle).await
    }

    fn describe(&self) -> &'static str {
        "process"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessStepConfig;

    fn config(program: &str, arguments: &[&str]) -> ProcessStepConfig {
        ProcessStepConfig {
            program: program.into(),
            arguments: arguments.iter().map(|s| s.to_string()).collect(),
            working_directory: None,
        }
    }

    #[tokio::test]
    async fn spawn_poll_collects_exit_and_output() {
        let launcher = TokioProcessLauncher::new();
        let handle = launcher
            .spawn(&config("/bin/sh", &["-c", "echo done"]))
            .await
            .unwrap();

        let outcome = loop {
            match launcher.poll_exit(&handle).await.unwrap() {
                PollOutcome::Pending => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
                PollOutcome::Terminal(outcome) => break outcome,
            }
        };
        assert_eq!(outcome.disposition, super::super::RemoteDisposition::Succeeded);
        let output = outcome.output.unwrap();
        assert!(output["stdout"].as_str().unwrap().contains("done"));
    }

    #[tokio::test]
    async fn large_stdout_does_not_block_the_exit() {
        let launcher = TokioProcessLauncher::new();
        // 256 KiB of output, well past the OS pipe buffer.
        let handle = launcher
            .spawn(&config(
                "/bin/sh",
                &["-c", "dd if=/dev/zero bs=1024 count=256 2>/dev/null | tr '\\0' 'a'"],
            ))
            .await
            .unwrap();

        let wait = async {
            loop {
                match launcher.poll_exit(&handle).await.unwrap() {
                    PollOutcome::Pending => {
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    }
                    PollOutcome::Terminal(outcome) => break outcome,
                }
            }
        };
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(10), wait)
            .await
            .expect("child should exit once its output is drained");
        assert_eq!(outcome.disposition, super::super::RemoteDisposition::Succeeded);
        let output = outcome.output.unwrap();
        assert_eq!(output["stdout"].as_str().unwrap().len(), 256 * 1024);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let launcher = TokioProcessLauncher::new();
        let handle = launcher
            .spawn(&config("/bin/sh", &["-c", "exit 3"]))
            .await
            .unwrap();

        let outcome = loop {
            match launcher.poll_exit(&handle).await.unwrap() {
                PollOutcome::Pending => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
                PollOutcome::Terminal(outcome) => break outcome,
            }
        };
        assert_eq!(outcome.disposition, super::super::RemoteDisposition::Failed);
        assert!(outcome.messages.errors[0].contains("exited"));
    }

    #[tokio::test]
    async fn kill_reaps_a_running_child() {
        let launcher = TokioProcessLauncher::new();
        let handle = launcher
            .spawn(&config("/bin/sh", &["-c", "sleep 60"]))
            .await
            .unwrap();

        assert_eq!(
            launcher.poll_exit(&handle).await.unwrap(),
            PollOutcome::Pending
        );
        launcher.kill(&handle).await.unwrap();

        // The child is gone from the table once killed.
        assert!(launcher.poll_exit(&handle).await.is_err());
    }

    #[tokio::test]
    async fn missing_program_fails_at_spawn() {
        let launcher = TokioProcessLauncher::new();
        let err = launcher
            .spawn(&config("/nonexistent/program", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Io(_)));
    }
}
