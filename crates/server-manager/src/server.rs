//! The contract between the client and an analysis server.
//!
//! A server is an opaque asynchronous service. Calls are issued
//! synchronously (the request is on its way once the method returns) and
//! answered through the returned future, which resolves exactly once.

use crate::errors::Result;
use crate::protocol::{AnalysisReport, AnalyzeRequest, RulesRequest};
use analysis_state::Rule;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Answer to a request that has already been sent.
pub type PendingResponse<T> = BoxFuture<'static, Result<T>>;

pub trait AnalysisServer: Send + Sync {
    fn analyze(&self, request: AnalyzeRequest) -> PendingResponse<AnalysisReport>;

    fn retrieve_rules(&self, request: RulesRequest) -> PendingResponse<Vec<Rule>>;

    /// Asks the server to shut down. Never blocks; completion is reported
    /// through the [`TerminationNotifier`] the server was launched with.
    fn terminate(&self);
}

#[async_trait]
pub trait ServerFactory: Send + Sync {
    async fn launch(&self, notifier: TerminationNotifier) -> Result<Arc<dyn AnalysisServer>>;
}

/// Handed to every launched server; fired when the server has ended,
/// whether it was asked to or not.
#[derive(Debug, Clone)]
pub struct TerminationNotifier {
    generation: u64,
    sender: mpsc::UnboundedSender<u64>,
}

impl TerminationNotifier {
    pub(crate) fn new(generation: u64, sender: mpsc::UnboundedSender<u64>) -> Self {
        Self { generation, sender }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn notify(&self) {
        // The manager may already be gone.
        let _ = self.sender.send(self.generation);
    }
}
