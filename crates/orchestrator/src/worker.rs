use crate::batch::{
    Admission, AnalyzeFilesRequest, CurrentAnalysis, FileIssues, display_paths, filter_to_base_dir,
    group_issues_by_file,
};
use crate::errors::{OrchestratorError, Result};
use crate::rule_refresh::{RefreshOutcome, await_rules};
use analysis_state::{
    AnalysisHistoryCache, AnalysisStatus, FileAnalysisHistory, IssueStore, LiveIssue, Rule, RuleCache,
    normalize_path, path_key,
};
use chrono::Utc;
use event_bus::{
    AnalysisCompleted, AnalysisEvent, AnalysisFailed, AnalysisStarted, EventBus, LintEvent, ServerEvent,
    ServerTerminated,
};
use server_manager::{
    AnalysisReport, ConnectionOptions, RulesRequest, ServerError, ServerExit, ServerManager,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Message types that can be sent to the analysis worker
#[derive(Debug)]
pub enum WorkerMessage {
    Analyze {
        request: AnalyzeFilesRequest,
        reply: oneshot::Sender<Result<Admission>>,
    },
    /// The server answered the analysis call of a batch
    AnalysisFinished {
        batch_id: Uuid,
        outcome: std::result::Result<AnalysisReport, ServerError>,
    },
    GetIssues {
        path: PathBuf,
        line: Option<u32>,
        reply: oneshot::Sender<Vec<LiveIssue>>,
    },
    GetUntetheredIssues {
        path: PathBuf,
        reply: oneshot::Sender<Vec<LiveIssue>>,
    },
    UpdateIssuePosition {
        path: PathBuf,
        original_line: u32,
        new_line: i64,
        reply: oneshot::Sender<usize>,
    },
    GetAnalysisStatus {
        path: PathBuf,
        reply: oneshot::Sender<AnalysisStatus>,
    },
    GetAnalysisHistory {
        path: PathBuf,
        reply: oneshot::Sender<Option<FileAnalysisHistory>>,
    },
    GetRule {
        key: String,
        allow_refresh: bool,
        reply: oneshot::Sender<Option<Rule>>,
    },
    RefreshRules {
        reply: oneshot::Sender<Result<usize>>,
    },
    /// A rule retrieval finished, failed or timed out
    RulesRefreshed { outcome: RefreshOutcome },
    IsAnalysisInProgress { reply: oneshot::Sender<bool> },
}

#[derive(Debug)]
enum RuleWaiter {
    Get {
        key: String,
        reply: oneshot::Sender<Option<Rule>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<usize>>,
    },
}

/// How a rule refresh ended, in a form every waiter can receive.
enum RefreshSummary {
    Loaded(usize),
    Failed(String),
    TimedOut(Duration),
}

impl RefreshSummary {
    fn to_result(&self) -> Result<usize> {
        match self {
            RefreshSummary::Loaded(count) => Ok(*count),
            RefreshSummary::Failed(message) => Err(OrchestratorError::RuleRefresh(message.clone())),
            RefreshSummary::TimedOut(limit) => Err(OrchestratorError::RefreshTimeout(*limit)),
        }
    }
}

/// Sole owner of the issue store, the analysis history, the rule cache and
/// the in-flight batch. Every mutation happens on this task; server answers
/// come back as messages.
pub struct AnalysisWorker {
    receiver: mpsc::Receiver<WorkerMessage>,
    sender: mpsc::WeakSender<WorkerMessage>,
    exits: broadcast::Receiver<ServerExit>,
    server_manager: Arc<ServerManager>,
    event_bus: Arc<EventBus>,
    cancellation_token: CancellationToken,
    rule_refresh_timeout: Duration,
    launch_timeout: Duration,
    default_connection: ConnectionOptions,
    issues: IssueStore,
    history: AnalysisHistoryCache,
    rules: RuleCache,
    current: Option<CurrentAnalysis>,
    last_connection: Option<ConnectionOptions>,
    rule_waiters: Vec<RuleWaiter>,
    refresh_in_flight: bool,
}

impl AnalysisWorker {
    pub fn new(
        receiver: mpsc::Receiver<WorkerMessage>,
        sender: mpsc::WeakSender<WorkerMessage>,
        server_manager: Arc<ServerManager>,
        event_bus: Arc<EventBus>,
        cancellation_token: CancellationToken,
        rule_refresh_timeout: Duration,
        launch_timeout: Duration,
        default_connection: ConnectionOptions,
    ) -> Self {
        Self {
            receiver,
            sender,
            exits: server_manager.subscribe_exits(),
            server_manager,
            event_bus,
            cancellation_token,
            rule_refresh_timeout,
            launch_timeout,
            default_connection,
            issues: IssueStore::new(),
            history: AnalysisHistoryCache::new(),
            rules: RuleCache::new(),
            current: None,
            last_connection: None,
            rule_waiters: Vec::new(),
            refresh_in_flight: false,
        }
    }

    /// Processes messages until the token is cancelled or every sender is gone.
    pub async fn run(mut self) {
        info!("Starting analysis worker");
        let mut exits_open = true;

        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                message = self.receiver.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        debug!("Message channel closed for analysis worker");
                        break;
                    }
                },
                exit = self.exits.recv(), if exits_open => match exit {
                    Ok(exit) => self.handle_server_exit(exit),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed server exit notifications");
                    }
                    Err(RecvError::Closed) => exits_open = false,
                },
            }
        }

        info!("Analysis worker shutting down");
    }

    async fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Analyze { request, reply } => {
                let admission = self.start_batch(request).await;
                let _ = reply.send(admission);
            }
            WorkerMessage::AnalysisFinished { batch_id, outcome } => match outcome {
                Ok(report) => self.complete_batch(batch_id, report),
                Err(e) => self.fail_batch(batch_id, &e.to_string()),
            },
            WorkerMessage::GetIssues { path, line, reply } => {
                let _ = reply.send(self.issues.get_issues(&path, line));
            }
            WorkerMessage::GetUntetheredIssues { path, reply } => {
                let _ = reply.send(self.issues.untethered_issues(&path));
            }
            WorkerMessage::UpdateIssuePosition {
                path,
                original_line,
                new_line,
                reply,
            } => {
                let updated = self.issues.update_issue_position(&path, original_line, new_line);
                debug!(
                    file = %path.display(),
                    original_line,
                    new_line,
                    updated,
                    "Issue positions updated"
                );
                let _ = reply.send(updated);
            }
            WorkerMessage::GetAnalysisStatus { path, reply } => {
                let _ = reply.send(self.history.get_analysis_status(&path));
            }
            WorkerMessage::GetAnalysisHistory { path, reply } => {
                let _ = reply.send(self.history.try_get_analysis_history(&path).cloned());
            }
            WorkerMessage::GetRule {
                key,
                allow_refresh,
                reply,
            } => self.get_rule(key, allow_refresh, reply).await,
            WorkerMessage::RefreshRules { reply } => {
                self.rule_waiters.push(RuleWaiter::Refresh { reply });
                self.ensure_rule_refresh().await;
            }
            WorkerMessage::RulesRefreshed { outcome } => self.finish_rule_refresh(outcome),
            WorkerMessage::IsAnalysisInProgress { reply } => {
                let _ = reply.send(self.current.is_some());
            }
        }
    }

    async fn start_batch(&mut self, request: AnalyzeFilesRequest) -> Result<Admission> {
        if let Some(current) = &self.current {
            info!(
                batch_id = %current.id,
                requested = request.files.len(),
                "Analysis already in progress, ignoring request"
            );
            return Ok(Admission::Busy);
        }

        let base_dir = normalize_path(&request.base_dir);
        let files = filter_to_base_dir(&request.files, &base_dir);
        if files.is_empty() {
            warn!(
                base_dir = %base_dir.display(),
                requested = request.files.len(),
                "No files to analyze under the base directory"
            );
            return Ok(Admission::NothingToAnalyze);
        }

        let batch = CurrentAnalysis::new(files, base_dir, request.connection);
        let batch_id = batch.id;
        let files = batch.files.clone();
        let server_request = batch.server_request();
        info!(batch_id = %batch_id, files = files.len(), "Analysis batch admitted");

        self.last_connection = Some(batch.connection.clone());
        self.current = Some(batch);
        self.event_bus.send(&LintEvent::Analysis(AnalysisEvent::Started(AnalysisStarted {
            batch_id: batch_id.to_string(),
            files: display_paths(&files),
            started_at: Utc::now(),
        })));

        let dispatched = timeout(
            self.launch_timeout,
            self.server_manager
                .with_server(|lease| (lease.generation, lease.server.analyze(server_request))),
        )
        .await;
        let (generation, pending) = match dispatched {
            Ok(Ok(dispatched)) => dispatched,
            Ok(Err(e)) => {
                self.fail_batch(batch_id, &e.to_string());
                return Err(e.into());
            }
            Err(_) => {
                let e = OrchestratorError::LaunchTimeout(self.launch_timeout);
                self.fail_batch(batch_id, &e.to_string());
                return Err(e);
            }
        };

        if let Some(current) = self.current.as_mut() {
            current.generation = Some(generation);
        }
        debug!(batch_id = %batch_id, generation, "Analysis batch dispatched");

        let sender = self.sender.clone();
        tokio::spawn(async move {
            let outcome = pending.await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender
                    .send(WorkerMessage::AnalysisFinished { batch_id, outcome })
                    .await;
            }
        });

        Ok(Admission::Admitted { batch_id, files })
    }

    /// Takes the in-flight batch if it is `batch_id`.
    fn take_current(&mut self, batch_id: Uuid) -> Option<CurrentAnalysis> {
        if self.current.as_ref().is_some_and(|current| current.id == batch_id) {
            return self.current.take();
        }
        debug!(batch_id = %batch_id, "Ignoring outcome of a finished batch");
        None
    }

    fn complete_batch(&mut self, batch_id: Uuid, report: AnalysisReport) {
        let Some(batch) = self.take_current(batch_id) else {
            return;
        };

        let issue_count = report.issues.len();
        let mut by_file = group_issues_by_file(report.issues);
        for file in &batch.files {
            by_file
                .entry(path_key(file))
                .or_insert_with(|| FileIssues::empty(file.clone()));
        }

        let mut counts = HashMap::new();
        for (key, file_issues) in by_file {
            let source = std::fs::read_to_string(&file_issues.path).ok();
            let live: Vec<LiveIssue> = file_issues
                .issues
                .into_iter()
                .map(|issue| LiveIssue::new(issue, source.as_deref()))
                .collect();
            counts.insert(key, live.len());
            self.issues.replace_issues_for_file(&file_issues.path, live);
        }

        for file in &batch.files {
            let count = counts.get(&path_key(file)).copied().unwrap_or(0);
            self.history.record_analysis(file, true, count);
        }

        info!(
            batch_id = %batch_id,
            files = batch.files.len(),
            issues = issue_count,
            elapsed_ms = (Utc::now() - batch.admitted_at).num_milliseconds(),
            "Analysis batch completed"
        );
        self.event_bus.send(&LintEvent::Analysis(AnalysisEvent::Completed(AnalysisCompleted {
            batch_id: batch_id.to_string(),
            files: display_paths(&batch.files),
            issue_count,
            completed_at: Utc::now(),
        })));
    }

    fn fail_batch(&mut self, batch_id: Uuid, error_message: &str) {
        let Some(batch) = self.take_current(batch_id) else {
            return;
        };

        for file in &batch.files {
            self.history.record_analysis(file, false, 0);
        }

        error!(
            batch_id = %batch_id,
            files = batch.files.len(),
            "Analysis batch failed: {}",
            error_message
        );
        self.event_bus.send(&LintEvent::Analysis(AnalysisEvent::Failed(AnalysisFailed {
            batch_id: batch_id.to_string(),
            files: display_paths(&batch.files),
            error: error_message.to_string(),
            failed_at: Utc::now(),
        })));
    }

    fn handle_server_exit(&mut self, exit: ServerExit) {
        self.event_bus.send(&LintEvent::Server(ServerEvent::Terminated(ServerTerminated {
            generation: exit.generation,
            requested: exit.requested,
            terminated_at: Utc::now(),
        })));

        let in_flight = self
            .current
            .as_ref()
            .filter(|current| current.generation == Some(exit.generation))
            .map(|current| current.id);
        if let Some(batch_id) = in_flight {
            self.fail_batch(batch_id, &ServerError::Terminated.to_string());
        }
    }

    async fn get_rule(&mut self, key: String, allow_refresh: bool, reply: oneshot::Sender<Option<Rule>>) {
        if let Some(rule) = self.rules.get(&key) {
            let _ = reply.send(Some(rule.clone()));
            return;
        }
        if !allow_refresh {
            let _ = reply.send(None);
            return;
        }

        debug!(rule = %key, "Rule not cached, refreshing rules");
        self.rule_waiters.push(RuleWaiter::Get { key, reply });
        self.ensure_rule_refresh().await;
    }

    /// Starts a rule retrieval unless one is already pending; waiters are
    /// answered together when it settles.
    async fn ensure_rule_refresh(&mut self) {
        if self.refresh_in_flight {
            return;
        }

        let request = RulesRequest {
            connection: self
                .last_connection
                .clone()
                .unwrap_or_else(|| self.default_connection.clone()),
        };
        // Acquiring the server counts against the refresh timeout.
        let limit = self.rule_refresh_timeout;
        let started = Instant::now();
        let acquired = timeout(
            limit,
            self.server_manager
                .with_server(|lease| lease.server.retrieve_rules(request)),
        )
        .await;
        let pending = match acquired {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => {
                self.finish_rule_refresh(RefreshOutcome::Failed(e.to_string()));
                return;
            }
            Err(_) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "Analysis server did not start before the rule refresh timeout"
                );
                self.finish_rule_refresh(RefreshOutcome::TimedOut(limit));
                return;
            }
        };

        self.refresh_in_flight = true;
        let remaining = limit.saturating_sub(started.elapsed());
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let outcome = match await_rules(pending, remaining).await {
                RefreshOutcome::TimedOut(_) => RefreshOutcome::TimedOut(limit),
                outcome => outcome,
            };
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(WorkerMessage::RulesRefreshed { outcome }).await;
            }
        });
    }

    fn finish_rule_refresh(&mut self, outcome: RefreshOutcome) {
        self.refresh_in_flight = false;
        let summary = match outcome {
            RefreshOutcome::Refreshed(rules) => {
                self.rules.replace_all(rules);
                RefreshSummary::Loaded(self.rules.len())
            }
            RefreshOutcome::Failed(message) => {
                warn!("Rule refresh failed: {}", message);
                RefreshSummary::Failed(message)
            }
            RefreshOutcome::TimedOut(limit) => RefreshSummary::TimedOut(limit),
        };

        for waiter in std::mem::take(&mut self.rule_waiters) {
            match waiter {
                // Retried once against the cache, never refreshed again.
                RuleWaiter::Get { key, reply } => {
                    let _ = reply.send(self.rules.get(&key).cloned());
                }
                RuleWaiter::Refresh { reply } => {
                    let _ = reply.send(summary.to_result());
                }
            }
        }
    }
}
