//! Shutdown Coordinator (spec §4.9). On a termination signal the node stops
//! taking new work, never quits an active flow unilaterally — persistence
//! lets the next process start resume it — and if queued with no active
//! run, submits `exit_market` and waits up to 60s for confirmation.
//!
//! Modeled on the teacher's `ShutdownController`/`spawn_ctrl_c_handler`
//! double-signal pattern: the first `ctrl_c` requests a graceful exit, a
//! second forces the process down immediately without waiting on the
//! pending `exit_market` confirmation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use worknode_core::{Address, NodeError, TxOutcome};

use crate::market::{ChainRpc, MarketClient};

/// Bound on how long shutdown waits for `exit_market` confirmation before
/// giving up and exiting anyway.
const EXIT_MARKET_TIMEOUT: Duration = Duration::from_secs(60);

/// Tracks how many termination signals have been received so a second
/// `ctrl_c` can force an immediate exit rather than waiting on the first's
/// graceful sequence.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    signals: AtomicU8,
}

/// What a termination signal asked the work loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// First signal: stop intake, finish settling any active flow, then
    /// exit the queue if idle.
    Graceful,
    /// Second signal: stop waiting immediately.
    Immediate,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one termination signal, returning which kind of shutdown it
    /// triggers.
    pub fn signal(&self) -> ShutdownSignal {
        let n = self.signals.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 1 { ShutdownSignal::Graceful } else { ShutdownSignal::Immediate }
    }

    pub fn requested(&self) -> bool {
        self.signals.load(Ordering::SeqCst) > 0
    }
}

/// Spawn a task that turns OS termination signals into [`ShutdownSignal`]s
/// on `tx`. Exits after the channel closes (receiver dropped) or the signal
/// stream errors.
pub fn spawn_signal_handler(coordinator: Arc<ShutdownCoordinator>, tx: mpsc::UnboundedSender<ShutdownSignal>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let signal = coordinator.signal();
            let forced_exit = signal == ShutdownSignal::Immediate;
            if tx.send(signal).is_err() || forced_exit {
                return;
            }
        }
    });
}

/// Outcome of the shutdown sequence's queue-exit step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The node was not queued; nothing to exit.
    NotQueued,
    /// `exit_market` was submitted and confirmed.
    ExitedQueue,
    /// `exit_market` was submitted but the chain rejected it or
    /// confirmation did not land within the timeout. Best-effort: the
    /// process exits regardless, the node will simply reappear in the
    /// queue (or re-enter) on next start.
    ExitIncomplete(String),
}

/// Run the shutdown sequence (spec §4.9 steps 2-4). Step 1 (stop intake) is
/// the work loop observing [`ShutdownCoordinator::requested`] at its next
/// state boundary; this function only owns the on-chain exit attempt.
///
/// Per invariant, an active flow is never quit here — only the work loop's
/// own `Claimed`/`Settling` handling, via expiration, may submit `quit`.
pub async fn run<R: ChainRpc>(market: &MarketClient<R>, market_addr: Address, is_queued: bool) -> ShutdownOutcome {
    if !is_queued {
        tracing::info!("shutdown: node not queued, nothing to exit");
        return ShutdownOutcome::NotQueued;
    }

    tracing::info!("shutdown: queued with no active flow, submitting exit_market");
    let exit_result: Result<ShutdownOutcome, NodeError> = async {
        let sig = market.exit_market(market_addr).await?;
        match tokio::time::timeout(EXIT_MARKET_TIMEOUT, market.await_tx(sig)).await {
            Ok(Ok(TxOutcome::Confirmed)) => Ok(ShutdownOutcome::ExitedQueue),
            Ok(Ok(TxOutcome::Failed { reason })) => Ok(ShutdownOutcome::ExitIncomplete(reason)),
            Ok(Ok(TxOutcome::TimedOut)) => Ok(ShutdownOutcome::ExitIncomplete("await_tx timed out".to_string())),
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(ShutdownOutcome::ExitIncomplete("60s shutdown window elapsed".to_string())),
        }
    }
    .await;

    match exit_result {
        Ok(outcome) => {
            tracing::info!(?outcome, "shutdown: exit_market sequence complete");
            outcome
        }
        Err(err) => {
            tracing::warn!(%err, "shutdown: exit_market submission failed");
            ShutdownOutcome::ExitIncomplete(err.to_string())
        }
    }
}
