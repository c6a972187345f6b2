//! Scripted in-process analysis server for tests.
//!
//! Enabled with the `test-utils` feature. Every server launched by one
//! [`FakeServerFactory`] shares its script, so tests can change behavior
//! between calls and inspect the requests that were made.

use crate::errors::{Result, ServerError};
use crate::protocol::{AnalysisReport, AnalyzeRequest, RulesRequest};
use crate::server::{AnalysisServer, PendingResponse, ServerFactory, TerminationNotifier};
use analysis_state::{IssueRange, ReportedIssue, Rule};
use async_trait::async_trait;
use futures::FutureExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum AnalysisBehavior {
    Report(Vec<ReportedIssue>),
    Fail(String),
    /// Answers with the issues once [`FakeServerFactory::release_analysis`]
    /// is called.
    Gated(Vec<ReportedIssue>),
}

#[derive(Debug, Clone)]
pub enum RulesBehavior {
    Respond(Vec<Rule>),
    Fail(String),
    /// Never answers while the server is alive.
    Never,
    After(Duration, Vec<Rule>),
}

struct LiveServer {
    generation: u64,
    stopped: CancellationToken,
    notifier: TerminationNotifier,
}

struct FakeState {
    launches: AtomicUsize,
    fail_launch: AtomicBool,
    hang_launch: AtomicBool,
    confirm_termination: AtomicBool,
    analysis: Mutex<AnalysisBehavior>,
    rules: Mutex<RulesBehavior>,
    analysis_gate: Semaphore,
    analyze_requests: Mutex<Vec<AnalyzeRequest>>,
    rule_requests: Mutex<Vec<RulesRequest>>,
    servers: Mutex<Vec<LiveServer>>,
}

#[derive(Clone)]
pub struct FakeServerFactory {
    state: Arc<FakeState>,
}

impl FakeServerFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FakeState {
                launches: AtomicUsize::new(0),
                fail_launch: AtomicBool::new(false),
                hang_launch: AtomicBool::new(false),
                confirm_termination: AtomicBool::new(true),
                analysis: Mutex::new(AnalysisBehavior::Report(Vec::new())),
                rules: Mutex::new(RulesBehavior::Respond(Vec::new())),
                analysis_gate: Semaphore::new(0),
                analyze_requests: Mutex::new(Vec::new()),
                rule_requests: Mutex::new(Vec::new()),
                servers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_analysis(&self, behavior: AnalysisBehavior) {
        *self.state.analysis.lock().unwrap() = behavior;
    }

    pub fn set_rules(&self, behavior: RulesBehavior) {
        *self.state.rules.lock().unwrap() = behavior;
    }

    pub fn fail_launches(&self, fail: bool) {
        self.state.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Launches never complete while set.
    pub fn hang_launches(&self, hang: bool) {
        self.state.hang_launch.store(hang, Ordering::SeqCst);
    }

    /// When false, `terminate` is ignored as if the server hung.
    pub fn confirm_termination(&self, confirm: bool) {
        self.state.confirm_termination.store(confirm, Ordering::SeqCst);
    }

    /// Lets one gated analysis answer.
    pub fn release_analysis(&self) {
        self.state.analysis_gate.add_permits(1);
    }

    pub fn launch_count(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn analyze_requests(&self) -> Vec<AnalyzeRequest> {
        self.state.analyze_requests.lock().unwrap().clone()
    }

    pub fn rule_requests(&self) -> Vec<RulesRequest> {
        self.state.rule_requests.lock().unwrap().clone()
    }

    /// Every live server exits on its own.
    pub fn crash(&self) {
        let servers: Vec<LiveServer> = self.state.servers.lock().unwrap().drain(..).collect();
        for server in servers {
            stop(&server);
        }
    }

    /// Only the server of `generation` exits, if it is still alive.
    pub fn crash_generation(&self, generation: u64) {
        let mut servers = self.state.servers.lock().unwrap();
        if let Some(index) = servers.iter().position(|s| s.generation == generation) {
            stop(&servers.remove(index));
        }
    }
}

impl Default for FakeServerFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn stop(server: &LiveServer) {
    server.stopped.cancel();
    server.notifier.notify();
}

#[async_trait]
impl ServerFactory for FakeServerFactory {
    async fn launch(&self, notifier: TerminationNotifier) -> Result<Arc<dyn AnalysisServer>> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(ServerError::Launch {
                command: "fake-analysis-server".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "launch disabled"),
            });
        }

        if self.state.hang_launch.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let stopped = CancellationToken::new();
        self.state.servers.lock().unwrap().push(LiveServer {
            generation: notifier.generation(),
            stopped: stopped.clone(),
            notifier: notifier.clone(),
        });

        Ok(Arc::new(FakeServer {
            state: Arc::clone(&self.state),
            generation: notifier.generation(),
            stopped,
        }))
    }
}

struct FakeServer {
    state: Arc<FakeState>,
    generation: u64,
    stopped: CancellationToken,
}

impl AnalysisServer for FakeServer {
    fn analyze(&self, request: AnalyzeRequest) -> PendingResponse<AnalysisReport> {
        self.state.analyze_requests.lock().unwrap().push(request);
        if self.stopped.is_cancelled() {
            return futures::future::ready(Err(ServerError::Terminated)).boxed();
        }

        let behavior = self.state.analysis.lock().unwrap().clone();
        match behavior {
            AnalysisBehavior::Report(issues) => futures::future::ready(Ok(AnalysisReport { issues })).boxed(),
            AnalysisBehavior::Fail(message) => {
                futures::future::ready(Err(ServerError::Remote { code: -32000, message })).boxed()
            }
            AnalysisBehavior::Gated(issues) => {
                let state = Arc::clone(&self.state);
                let stopped = self.stopped.clone();
                async move {
                    tokio::select! {
                        _ = stopped.cancelled() => Err(ServerError::Terminated),
                        permit = state.analysis_gate.acquire() => {
                            permit.map_err(|_| ServerError::Terminated)?.forget();
                            Ok(AnalysisReport { issues })
                        }
                    }
                }
                .boxed()
            }
        }
    }

    fn retrieve_rules(&self, request: RulesRequest) -> PendingResponse<Vec<Rule>> {
        self.state.rule_requests.lock().unwrap().push(request);
        if self.stopped.is_cancelled() {
            return futures::future::ready(Err(ServerError::Terminated)).boxed();
        }

        let behavior = self.state.rules.lock().unwrap().clone();
        let stopped = self.stopped.clone();
        match behavior {
            RulesBehavior::Respond(rules) => futures::future::ready(Ok(rules)).boxed(),
            RulesBehavior::Fail(message) => {
                futures::future::ready(Err(ServerError::Remote { code: -32000, message })).boxed()
            }
            RulesBehavior::Never => async move {
                stopped.cancelled().await;
                Err(ServerError::Terminated)
            }
            .boxed(),
            RulesBehavior::After(delay, rules) => async move {
                tokio::select! {
                    _ = stopped.cancelled() => Err(ServerError::Terminated),
                    _ = tokio::time::sleep(delay) => Ok(rules),
                }
            }
            .boxed(),
        }
    }

    fn terminate(&self) {
        if !self.state.confirm_termination.load(Ordering::SeqCst) {
            return;
        }
        let mut servers = self.state.servers.lock().unwrap();
        if let Some(index) = servers.iter().position(|s| s.generation == self.generation) {
            stop(&servers.remove(index));
        }
    }
}

/// A reported issue on a single line of `file`.
pub fn reported_issue(file: &Path, rule_key: &str, line: u32) -> ReportedIssue {
    ReportedIssue {
        rule_key: rule_key.to_string(),
        message: format!("{rule_key} violated"),
        file: file.to_path_buf(),
        range: IssueRange {
            start_line: line,
            start_line_offset: 0,
            end_line: line,
            end_line_offset: 1,
        },
    }
}

pub fn rule(key: &str) -> Rule {
    Rule {
        key: key.to_string(),
        name: format!("Rule {key}"),
        description: String::new(),
        severity: Some("MAJOR".to_string()),
        rule_type: Some("CODE_SMELL".to_string()),
    }
}
