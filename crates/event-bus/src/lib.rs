//! # IDE Lint Event Bus
//!
//! The event bus broadcasts what the analysis core has accomplished to any
//! number of subscribers (an IDE panel, a status bar, the CLI).
//!
//! ## Channels
//!
//! - **Analysis started**: a batch was admitted; carries the files that will
//!   actually be analyzed (after base directory filtering)
//! - **Analysis complete**: issues and history for the batch are stored
//! - **Analysis failed**: the batch failed; history records the failure
//! - **Server lifecycle**: the background analysis server exited or was
//!   restarted
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────┐    ┌─────────────────┐
//! │  Orchestrator   │    │  Event Bus   │    │   Subscribers   │
//! │  worker task    │───▶│  (Broadcast) │───▶│   • IDE panel   │
//! │                 │    │              │    │   • CLI         │
//! └─────────────────┘    └──────────────┘    └─────────────────┘
//! ```
//!
//! Events of one batch are always sent in order: started, then exactly one
//! of complete or failed. Subscribing is `subscribe()`, unsubscribing is
//! dropping the receiver.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, Sender};
use ts_rs::TS;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug, Serialize, TS)]
#[ts(export, export_to = "../../../packages/ide-lint/src/events.ts")]
#[serde(tag = "type", content = "payload")]
pub enum LintEvent {
    Analysis(AnalysisEvent),
    Server(ServerEvent),
}

#[derive(Clone, Debug, Serialize, TS)]
#[ts(export, export_to = "../../../packages/ide-lint/src/events.ts")]
#[serde(tag = "status")]
pub enum AnalysisEvent {
    Started(AnalysisStarted),
    Completed(AnalysisCompleted),
    Failed(AnalysisFailed),
}

#[derive(Clone, Debug, Serialize, TS)]
#[ts(export, export_to = "../../../packages/ide-lint/src/events.ts")]
pub struct AnalysisStarted {
    pub batch_id: String,
    pub files: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, TS)]
#[ts(export, export_to = "../../../packages/ide-lint/src/events.ts")]
pub struct AnalysisCompleted {
    pub batch_id: String,
    pub files: Vec<String>,
    pub issue_count: usize,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, TS)]
#[ts(export, export_to = "../../../packages/ide-lint/src/events.ts")]
pub struct AnalysisFailed {
    pub batch_id: String,
    pub files: Vec<String>,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, TS)]
#[ts(export, export_to = "../../../packages/ide-lint/src/events.ts")]
#[serde(tag = "status")]
pub enum ServerEvent {
    Terminated(ServerTerminated),
    Restarted(ServerRestarted),
}

#[derive(Clone, Debug, Serialize, TS)]
#[ts(export, export_to = "../../../packages/ide-lint/src/events.ts")]
pub struct ServerTerminated {
    pub generation: u64,
    /// False when the server process ended on its own.
    pub requested: bool,
    pub terminated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, TS)]
#[ts(export, export_to = "../../../packages/ide-lint/src/events.ts")]
pub struct ServerRestarted {
    /// True when the old server did not confirm termination in time.
    pub forced: bool,
    pub restarted_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: Sender<LintEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn send(&self, event: &LintEvent) {
        if self.sender.send(event.clone()).is_err() {
            // No subscribers is a normal state, e.g. a headless run.
            tracing::debug!("No receivers for event bus, ignoring event: {:?}", &event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LintEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
