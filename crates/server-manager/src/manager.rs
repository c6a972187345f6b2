//! Ownership of the single background analysis server.
//!
//! Every read, launch and termination of the server handle happens under one
//! async mutex. Exits are reported by the servers themselves through a
//! [`TerminationNotifier`] and handled by a watcher task, which clears the
//! handle when the exit was not requested and broadcasts a [`ServerExit`].
//!
//! Handles are numbered with a generation. A late exit of a replaced server
//! never clears its successor.

use crate::errors::{Result, ServerError};
use crate::server::{AnalysisServer, ServerFactory, TerminationNotifier};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EXIT_CHANNEL_CAPACITY: usize = 64;

/// A server handle checked out under the manager's lock.
#[derive(Clone)]
pub struct ServerLease {
    pub generation: u64,
    pub server: Arc<dyn AnalysisServer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerExit {
    pub generation: u64,
    /// False when the server ended on its own.
    pub requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The old server confirmed its exit in time, or none was running.
    Confirmed,
    /// The wait timed out and the manager moved on without confirmation.
    Forced,
}

#[derive(Default)]
struct ServerSlot {
    current: Option<ServerLease>,
    closed: bool,
}

pub struct ServerManager {
    factory: Arc<dyn ServerFactory>,
    slot: Mutex<ServerSlot>,
    next_generation: AtomicU64,
    termination_sender: mpsc::UnboundedSender<u64>,
    exited: watch::Sender<u64>,
    exits: broadcast::Sender<ServerExit>,
    restart_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl ServerManager {
    /// Creates the manager and its exit watcher. Must be called from within a
    /// tokio runtime.
    pub fn new(factory: Arc<dyn ServerFactory>, restart_timeout: Duration) -> Arc<Self> {
        let (termination_sender, termination_receiver) = mpsc::unbounded_channel();
        let (exited, _) = watch::channel(0);
        let (exits, _) = broadcast::channel(EXIT_CHANNEL_CAPACITY);

        let manager = Arc::new(Self {
            factory,
            slot: Mutex::new(ServerSlot::default()),
            next_generation: AtomicU64::new(1),
            termination_sender,
            exited,
            exits,
            restart_timeout,
            cancellation_token: CancellationToken::new(),
        });

        tokio::spawn(watch_exits(
            Arc::downgrade(&manager),
            termination_receiver,
            manager.cancellation_token.clone(),
        ));
        manager
    }

    /// Returns the running server, launching one if there is none.
    pub async fn get_server(&self) -> Result<ServerLease> {
        let mut slot = self.slot.lock().await;
        self.ensure_running(&mut slot).await
    }

    /// Runs `action` against the running server while holding the lock, so no
    /// termination can interleave with it.
    pub async fn with_server<T>(&self, action: impl FnOnce(&ServerLease) -> T) -> Result<T> {
        let mut slot = self.slot.lock().await;
        let lease = self.ensure_running(&mut slot).await?;
        Ok(action(&lease))
    }

    /// Asks the current server to shut down without waiting for it. Returns
    /// the generation that was terminated, if any.
    pub async fn terminate(&self) -> Option<u64> {
        let mut slot = self.slot.lock().await;
        let lease = slot.current.take()?;
        info!(generation = lease.generation, "Terminating analysis server");
        lease.server.terminate();
        Some(lease.generation)
    }

    /// Terminates the current server, waits up to the restart timeout for it to
    /// confirm, and launches a replacement either way.
    pub async fn restart(&self) -> Result<TerminationOutcome> {
        let mut slot = self.slot.lock().await;
        let outcome = self.terminate_and_wait(&mut slot, self.restart_timeout).await;
        let lease = self.ensure_running(&mut slot).await?;
        info!(generation = lease.generation, ?outcome, "Analysis server restarted");
        Ok(outcome)
    }

    /// Terminates the current server and refuses to launch new ones.
    pub async fn shutdown(&self, limit: Duration) -> TerminationOutcome {
        let mut slot = self.slot.lock().await;
        slot.closed = true;
        self.terminate_and_wait(&mut slot, limit).await
    }

    pub fn subscribe_exits(&self) -> broadcast::Receiver<ServerExit> {
        self.exits.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.slot.lock().await.current.is_some()
    }

    async fn ensure_running(&self, slot: &mut ServerSlot) -> Result<ServerLease> {
        if slot.closed {
            return Err(ServerError::Terminated);
        }
        if let Some(lease) = &slot.current {
            return Ok(lease.clone());
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        info!(generation, "Launching analysis server");
        let notifier = TerminationNotifier::new(generation, self.termination_sender.clone());
        let server = self.factory.launch(notifier).await?;

        let lease = ServerLease { generation, server };
        slot.current = Some(lease.clone());
        Ok(lease)
    }

    async fn terminate_and_wait(&self, slot: &mut ServerSlot, limit: Duration) -> TerminationOutcome {
        let Some(lease) = slot.current.take() else {
            return TerminationOutcome::Confirmed;
        };

        // Subscribe before terminating so a fast exit is not missed.
        let mut exited = self.exited.subscribe();
        lease.server.terminate();

        let confirmed = timeout(limit, async {
            exited.wait_for(|max| *max >= lease.generation).await.is_ok()
        })
        .await
        .unwrap_or(false);

        if confirmed {
            TerminationOutcome::Confirmed
        } else {
            warn!(
                generation = lease.generation,
                timeout_ms = limit.as_millis() as u64,
                "Analysis server did not confirm termination in time, forcing"
            );
            // The abandoned server may never report its exit. Report it here so
            // work dispatched to it is released; a late real exit is deduplicated.
            if self.termination_sender.send(lease.generation).is_err() {
                debug!(generation = lease.generation, "Server exit watcher already stopped");
            }
            TerminationOutcome::Forced
        }
    }

    async fn handle_exit(&self, generation: u64) {
        // Published before taking the lock: a restart holds the lock while it
        // waits for exactly this confirmation.
        self.exited.send_if_modified(|max| {
            if generation > *max {
                *max = generation;
                true
            } else {
                false
            }
        });

        let requested = {
            let mut slot = self.slot.lock().await;
            let unsolicited = slot
                .current
                .as_ref()
                .is_some_and(|lease| lease.generation == generation);
            if unsolicited {
                slot.current = None;
            }
            !unsolicited
        };

        if requested {
            info!(generation, "Analysis server exited");
        } else {
            warn!(generation, "Analysis server exited unexpectedly");
        }

        if self.exits.send(ServerExit { generation, requested }).is_err() {
            debug!(generation, "No subscribers for server exit");
        }
    }
}

impl Drop for ServerManager {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        if let Some(lease) = self.slot.get_mut().current.take() {
            lease.server.terminate();
        }
    }
}

async fn watch_exits(
    manager: Weak<ServerManager>,
    mut receiver: mpsc::UnboundedReceiver<u64>,
    cancellation_token: CancellationToken,
) {
    let mut seen = HashSet::new();
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            generation = receiver.recv() => {
                let Some(generation) = generation else { break };
                if !seen.insert(generation) {
                    continue;
                }
                let Some(manager) = manager.upgrade() else { break };
                manager.handle_exit(generation).await;
            }
        }
    }
    debug!("Server exit watcher stopped");
}
