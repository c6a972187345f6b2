//! Bounded wait for a rule retrieval.
//!
//! The retrieval is awaited by its own task. When the waiter gives up, it
//! raises the `abandoned` flag; the retrieval task checks it before handing
//! the rules over, so a late answer is dropped instead of applied.

use analysis_state::Rule;
use server_manager::{PendingResponse, ServerError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) enum RefreshOutcome {
    Refreshed(Vec<Rule>),
    Failed(String),
    TimedOut(Duration),
}

pub(crate) async fn await_rules(pending: PendingResponse<Vec<Rule>>, limit: Duration) -> RefreshOutcome {
    let abandoned = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = oneshot::channel();

    let flag = Arc::clone(&abandoned);
    tokio::spawn(async move {
        let result = pending.await;
        if flag.load(Ordering::SeqCst) {
            discard_late(result);
        } else if let Err(result) = sender.send(result) {
            discard_late(result);
        }
    });

    match timeout(limit, receiver).await {
        Ok(Ok(Ok(rules))) => RefreshOutcome::Refreshed(rules),
        Ok(Ok(Err(e))) => RefreshOutcome::Failed(e.to_string()),
        Ok(Err(_)) => RefreshOutcome::Failed("rule retrieval was dropped".to_string()),
        Err(_) => {
            abandoned.store(true, Ordering::SeqCst);
            warn!(timeout_ms = limit.as_millis() as u64, "Rule refresh timed out");
            RefreshOutcome::TimedOut(limit)
        }
    }
}

fn discard_late(result: Result<Vec<Rule>, ServerError>) {
    match result {
        Ok(rules) => warn!(
            rules = rules.len(),
            "Discarding rule refresh result that arrived after the timeout"
        ),
        Err(e) => debug!("Rule refresh failed after the timeout: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use server_manager::testing::rule;

    #[tokio::test]
    async fn test_rules_before_timeout_are_returned() {
        let pending = async { Ok(vec![rule("pas:A")]) }.boxed();

        let outcome = await_rules(pending, Duration::from_secs(1)).await;

        assert!(matches!(outcome, RefreshOutcome::Refreshed(rules) if rules.len() == 1));
    }

    #[tokio::test]
    async fn test_error_releases_wait() {
        let pending = async { Err(ServerError::Terminated) }.boxed();

        let outcome = await_rules(pending, Duration::from_secs(1)).await;

        assert!(matches!(outcome, RefreshOutcome::Failed(message) if message == "analysis server terminated"));
    }

    #[tokio::test]
    async fn test_late_rules_are_not_returned() {
        let pending = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(vec![rule("pas:A")])
        }
        .boxed();

        let outcome = await_rules(pending, Duration::from_millis(20)).await;

        assert!(matches!(outcome, RefreshOutcome::TimedOut(limit) if limit == Duration::from_millis(20)));
    }
}
