//! The orchestrator handle.
//!
//! [`AnalysisOrchestrator`] is cheap to call from any task. Every state
//! query and mutation is forwarded to the analysis worker, which owns the
//! state; server lifecycle calls go to the [`ServerManager`] directly.

use crate::batch::{Admission, AnalyzeFilesRequest};
use crate::errors::{OrchestratorError, Result};
use crate::project_options::{JsonProjectOptions, ProjectOptionsSource};
use crate::worker::{AnalysisWorker, WorkerMessage};
use analysis_state::{AnalysisStatus, ClientSettings, FileAnalysisHistory, LiveIssue, Rule};
use chrono::Utc;
use event_bus::{AnalysisEvent, EventBus, LintEvent, ServerEvent, ServerRestarted};
use server_manager::{ConnectionOptions, ServerFactory, ServerManager, TerminationOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Maximum number of requests queued for the worker before callers wait.
const WORKER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub restart_timeout: Duration,
    pub rule_refresh_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Bounds server acquisition for a batch.
    pub launch_timeout: Duration,
    /// Used for rule retrieval until a batch supplies its own connection.
    pub default_connection: ConnectionOptions,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            restart_timeout: settings.restart_timeout(),
            rule_refresh_timeout: settings.rule_refresh_timeout(),
            shutdown_timeout: settings.shutdown_timeout(),
            launch_timeout: settings.launch_timeout(),
            default_connection: ConnectionOptions::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

/// Final state of one batch as seen on the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub files: Vec<PathBuf>,
    pub issue_count: usize,
}

pub struct AnalysisOrchestrator {
    sender: mpsc::Sender<WorkerMessage>,
    server_manager: Arc<ServerManager>,
    event_bus: Arc<EventBus>,
    project_options: Arc<dyn ProjectOptionsSource>,
    shutdown_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl AnalysisOrchestrator {
    /// Starts the analysis worker. Must be called from within a tokio runtime.
    pub fn new(factory: Arc<dyn ServerFactory>, event_bus: Arc<EventBus>, config: OrchestratorConfig) -> Self {
        let server_manager = ServerManager::new(factory, config.restart_timeout);
        let (sender, receiver) = mpsc::channel(WORKER_QUEUE_CAPACITY);
        let cancellation_token = CancellationToken::new();

        let worker = AnalysisWorker::new(
            receiver,
            sender.downgrade(),
            Arc::clone(&server_manager),
            Arc::clone(&event_bus),
            cancellation_token.clone(),
            config.rule_refresh_timeout,
            config.launch_timeout,
            config.default_connection,
        );
        tokio::spawn(worker.run());

        Self {
            sender,
            server_manager,
            event_bus,
            project_options: Arc::new(JsonProjectOptions),
            shutdown_timeout: config.shutdown_timeout,
            cancellation_token,
        }
    }

    pub fn with_project_options(mut self, source: Arc<dyn ProjectOptionsSource>) -> Self {
        self.project_options = source;
        self
    }

    /// Admits a batch unless one is already in flight. Files outside
    /// `base_dir` are dropped from the batch. The outcome of an admitted
    /// batch is published on the event bus.
    pub async fn analyze_files(
        &self,
        files: Vec<PathBuf>,
        base_dir: &Path,
        connection: ConnectionOptions,
    ) -> Result<Admission> {
        let request = AnalyzeFilesRequest {
            files,
            base_dir: base_dir.to_path_buf(),
            connection,
        };
        self.request(|reply| WorkerMessage::Analyze { request, reply })
            .await?
    }

    /// Like [`Self::analyze_files`], with base directory and connection taken
    /// from the options of `project_file`.
    pub async fn analyze_files_with_project_options(
        &self,
        files: Vec<PathBuf>,
        project_file: &Path,
    ) -> Result<Admission> {
        let options = self.project_options.load(project_file)?;
        self.analyze_files(files, &options.base_dir, options.connection)
            .await
    }

    /// Analyzes the files and waits for the batch to complete or fail.
    pub async fn run_batch(
        &self,
        files: Vec<PathBuf>,
        base_dir: &Path,
        connection: ConnectionOptions,
    ) -> Result<Option<BatchOutcome>> {
        // Subscribed before submitting so the outcome cannot be missed.
        let mut events = self.event_bus.subscribe();
        let admission = self.analyze_files(files, base_dir, connection).await?;
        let Admission::Admitted { batch_id, files } = admission else {
            return Ok(None);
        };

        let expected = batch_id.to_string();
        loop {
            match events.recv().await {
                Ok(LintEvent::Analysis(AnalysisEvent::Completed(event))) if event.batch_id == expected => {
                    return Ok(Some(BatchOutcome {
                        batch_id,
                        files,
                        issue_count: event.issue_count,
                    }));
                }
                Ok(LintEvent::Analysis(AnalysisEvent::Failed(event))) if event.batch_id == expected => {
                    return Err(OrchestratorError::Analysis(event.error));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged while waiting for batch");
                }
                Err(RecvError::Closed) => return Err(OrchestratorError::WorkerUnavailable),
            }
        }
    }

    pub async fn get_issues(&self, path: &Path, line: Option<u32>) -> Result<Vec<LiveIssue>> {
        let path = path.to_path_buf();
        self.request(|reply| WorkerMessage::GetIssues { path, line, reply })
            .await
    }

    /// Issues of `path` whose line was deleted, kept until the next analysis.
    pub async fn get_untethered_issues(&self, path: &Path) -> Result<Vec<LiveIssue>> {
        let path = path.to_path_buf();
        self.request(|reply| WorkerMessage::GetUntetheredIssues { path, reply })
            .await
    }

    /// Moves issues anchored at `original_line`; a negative `new_line` marks
    /// the line deleted. Returns the number of issues touched.
    pub async fn update_issue_position(&self, path: &Path, original_line: u32, new_line: i64) -> Result<usize> {
        let path = path.to_path_buf();
        self.request(|reply| WorkerMessage::UpdateIssuePosition {
            path,
            original_line,
            new_line,
            reply,
        })
        .await
    }

    pub async fn get_analysis_status(&self, path: &Path) -> Result<AnalysisStatus> {
        let path = path.to_path_buf();
        self.request(|reply| WorkerMessage::GetAnalysisStatus { path, reply })
            .await
    }

    pub async fn get_analysis_history(&self, path: &Path) -> Result<Option<FileAnalysisHistory>> {
        let path = path.to_path_buf();
        self.request(|reply| WorkerMessage::GetAnalysisHistory { path, reply })
            .await
    }

    /// Returns the cached rule. On a miss with `allow_refresh`, refreshes the
    /// rule set once (bounded by the refresh timeout) and looks again.
    pub async fn get_rule(&self, key: &str, allow_refresh: bool) -> Result<Option<Rule>> {
        let key = key.to_string();
        self.request(|reply| WorkerMessage::GetRule {
            key,
            allow_refresh,
            reply,
        })
        .await
    }

    /// Replaces the rule set from the server. Returns the number of rules.
    pub async fn refresh_rules(&self) -> Result<usize> {
        self.request(|reply| WorkerMessage::RefreshRules { reply })
            .await?
    }

    pub async fn is_analysis_in_progress(&self) -> Result<bool> {
        self.request(|reply| WorkerMessage::IsAnalysisInProgress { reply })
            .await
    }

    /// Replaces the analysis server. A batch in flight on the old server fails.
    pub async fn restart_server(&self) -> Result<TerminationOutcome> {
        let outcome = self.server_manager.restart().await?;
        self.event_bus.send(&LintEvent::Server(ServerEvent::Restarted(ServerRestarted {
            forced: outcome == TerminationOutcome::Forced,
            restarted_at: Utc::now(),
        })));
        Ok(outcome)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LintEvent> {
        self.event_bus.subscribe()
    }

    /// Terminates the server, waiting up to the shutdown timeout for it, and
    /// stops the worker.
    pub async fn shutdown(&self) -> TerminationOutcome {
        let outcome = self.server_manager.shutdown(self.shutdown_timeout).await;
        info!(?outcome, "Analysis orchestrator shut down");
        self.cancellation_token.cancel();
        outcome
    }

    async fn request<T>(&self, message: impl FnOnce(oneshot::Sender<T>) -> WorkerMessage) -> Result<T> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(message(reply))
            .await
            .map_err(|_| OrchestratorError::WorkerUnavailable)?;
        receiver.await.map_err(|_| OrchestratorError::WorkerUnavailable)
    }
}

impl Drop for AnalysisOrchestrator {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
