//! Work Loop (spec §4.8): drives the node state machine. One cooperative
//! task ticks on a timer, consulting the Health Monitor, finding assigned
//! runs, materializing and running flows, and settling them, guarded by the
//! at-most-one-active-flow invariant.

use std::sync::Arc;

use worknode_core::{Address, Cid, NodeError, Run, TxOutcome};

use crate::blob::ObjectStore;
use crate::flow::builder::JobDocument;
use crate::flow::model::FlowId;
use crate::flow::store::KvStore;
use crate::flow::{ContainerEngine, GitDriver};
use crate::health::{self, HealthProbe, HealthSnapshot};
use crate::market::ChainRpc;
use crate::settlement;
use crate::shutdown::ShutdownCoordinator;
use crate::NodeContext;

/// How often the Health Monitor is actually probed; between probes the
/// work loop trusts the cached [`WorkLoopState::Unhealthy`]/healthy
/// verdict.
const HEALTH_RECHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15 * 60);

/// The work loop's state machine, per spec §4.8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkLoopState {
    /// Initial state and the state re-entered whenever a health recheck is
    /// due; resolves to `Idle` or `Unhealthy` within the same tick.
    CheckingHealth,
    /// Health Monitor reported at least one reason; no chain actions taken
    /// until the next recheck window passes.
    Unhealthy,
    /// Healthy, not queued, no active flow: looks for assigned runs or
    /// enters the market queue.
    Idle,
    /// In the market queue, no active flow: rechecks for an assigned run
    /// each tick.
    Queued,
    /// Holds a flow that has not yet run to completion (every reachable op
    /// recorded a status).
    Claimed(FlowId),
    /// Holds a flow whose ops are done; Settlement decides finish vs. quit
    /// vs. still-running.
    Settling(FlowId),
    /// Terminal: the shutdown sequence has run (or is not applicable) and
    /// the process should exit.
    ShuttingDown,
}

/// Drives one node process's tick-by-tick state machine. Generic over the
/// five collaborator traits so tests can swap in fakes; production code
/// instantiates this with the `Http*`/`Shell*`/`Docker*` adapters.
pub struct WorkLoop<R, S, K, G, C> {
    ctx: NodeContext<R, S, K, G, C>,
    shutdown: Arc<ShutdownCoordinator>,
    state: WorkLoopState,
    last_health_check: Option<tokio::time::Instant>,
}

impl<R, S, K, G, C> WorkLoop<R, S, K, G, C>
where
    R: ChainRpc,
    S: ObjectStore,
    K: KvStore,
    G: GitDriver,
    C: ContainerEngine,
{
    pub fn new(ctx: NodeContext<R, S, K, G, C>, shutdown: Arc<ShutdownCoordinator>) -> Self {
        Self { ctx, shutdown, state: WorkLoopState::CheckingHealth, last_health_check: None }
    }

    pub fn state(&self) -> &WorkLoopState {
        &self.state
    }

    /// True while a flow is claimed-but-not-settled, enforcing "at most one
    /// active flow per node process" (spec §3 invariant 1).
    pub fn has_active_flow(&self) -> bool {
        matches!(self.state, WorkLoopState::Claimed(_) | WorkLoopState::Settling(_))
    }

    /// True once the shutdown sequence has completed and the process
    /// should exit its outer loop.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self.state, WorkLoopState::ShuttingDown)
    }

    fn should_recheck_health(&self) -> bool {
        match self.last_health_check {
            None => true,
            Some(last) => last.elapsed() >= HEALTH_RECHECK_INTERVAL,
        }
    }

    /// Advance the state machine by exactly one tick. Transient errors
    /// (§7: `RpcTransient`, `BlobTransient`, `ContainerUnreachable`) are
    /// logged and leave the state unchanged, to be retried next tick;
    /// every other error kind is returned to the caller, who decides
    /// whether it is fatal (only `Misconfiguration` at startup is).
    pub async fn tick(&mut self) -> Result<(), NodeError> {
        if self.is_shutting_down() {
            return Ok(());
        }

        // Step 1 of shutdown (spec §4.9): stop intake at the next state
        // boundary, i.e. the start of the next tick — a long-running
        // `advance`/`process_flow` call within one tick cannot be
        // interrupted mid-op (spec §5). Step 2: an active flow is never
        // quit unilaterally here; its persisted state and the
        // job->flow index let the next process start resume it.
        if self.shutdown.requested() {
            let is_queued = if self.has_active_flow() {
                false
            } else {
                match self.is_queued().await {
                    Ok(v) => v,
                    Err(err) => {
                        self.log_transient_or_propagate(err)?;
                        return Ok(());
                    }
                }
            };
            let outcome = crate::shutdown::run(&self.ctx.market, self.ctx.config.market_addr, is_queued).await;
            tracing::info!(?outcome, "shutdown sequence finished");
            self.state = WorkLoopState::ShuttingDown;
            return Ok(());
        }

        if !self.has_active_flow() && self.should_recheck_health() {
            self.state = self.run_health_check().await?;
            if matches!(self.state, WorkLoopState::Unhealthy) {
                return Ok(());
            }
        }

        match self.state.clone() {
            WorkLoopState::CheckingHealth | WorkLoopState::Unhealthy => {
                // Recheck window not yet elapsed; nothing to do.
            }
            WorkLoopState::Idle => self.tick_idle().await?,
            WorkLoopState::Queued => self.tick_queued().await?,
            WorkLoopState::Claimed(flow_id) => self.tick_claimed(flow_id).await?,
            WorkLoopState::Settling(flow_id) => self.tick_settling(flow_id).await?,
            WorkLoopState::ShuttingDown => {}
        }
        Ok(())
    }

    async fn run_health_check(&mut self) -> Result<WorkLoopState, NodeError> {
        self.last_health_check = Some(tokio::time::Instant::now());
        let snapshot = match self.ctx.market.node_balances(self.ctx.config.node_addr).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(%err, "health: balance probe failed, treating as zero balance");
                HealthSnapshot { sol_balance: 0, nos_balance: 0, nft_count: 0 }
            }
        };
        let container_engine_reachable = self.ctx.container.ping().await.is_ok();
        let status = health::check(
            &self.ctx.config,
            HealthProbe { snapshot, container_engine_reachable },
        );
        tracing::info!(healthy = status.is_healthy(), "health check complete");
        Ok(if status.is_healthy() { WorkLoopState::Idle } else { WorkLoopState::Unhealthy })
    }

    async fn is_queued(&self) -> Result<bool, NodeError> {
        let market = self.ctx.market.get_market(self.ctx.config.market_addr).await?;
        Ok(market.queue.contains(&self.ctx.config.node_addr))
    }

    /// Return the first run claimed by this node whose job belongs to the
    /// configured market, guarding against stale runs left over from a
    /// previous market (spec §4.8).
    async fn find_next_assigned_run(&self) -> Result<Option<(Address, Run)>, NodeError> {
        let runs = self.ctx.market.find_my_runs(self.ctx.config.node_addr).await?;
        for (run_addr, run) in runs {
            let job = self.ctx.market.get_job(run.job).await?;
            if job.market == self.ctx.config.market_addr {
                return Ok(Some((run_addr, run)));
            }
        }
        Ok(None)
    }

    /// Materialize a flow for `(job_addr, run_addr)`, or resume the one
    /// already associated with `job_addr` (spec §3 invariant 3, scenario
    /// 4: restart mid-flow).
    async fn build_or_resume_flow(&self, job_addr: Address, run_addr: Address, run: &Run) -> Result<FlowId, NodeError> {
        if let Some(existing) = self.ctx.store.flow_id_for_job(job_addr).await? {
            return Ok(existing);
        }

        let job = self.ctx.market.get_job(job_addr).await?;
        let cid = Cid::encode(job.ipfs_job);
        let doc_value = self.ctx.blob.get_json(&cid).await?;
        let doc: JobDocument = serde_json::from_value((*doc_value).clone())?;

        let mut flow = self.ctx.builders.build(job_addr, run_addr, &doc)?;
        let market = self.ctx.market.get_market(self.ctx.config.market_addr).await?;
        flow.expires = Some(run.time + market.job_timeout as i64);

        self.ctx.store.assoc_job(job_addr, &flow.id).await?;
        self.ctx.store.save_flow(&flow).await?;
        Ok(flow.id)
    }

    async fn tick_idle(&mut self) -> Result<(), NodeError> {
        match self.find_next_assigned_run().await {
            Ok(Some((run_addr, run))) => match self.build_or_resume_flow(run.job, run_addr, &run).await {
                Ok(flow_id) => self.state = WorkLoopState::Claimed(flow_id),
                Err(err) => self.log_transient_or_propagate(err)?,
            },
            Ok(None) => match self.is_queued().await {
                Ok(true) => self.state = WorkLoopState::Queued,
                Ok(false) => match self.ctx.market.enter_market(self.ctx.config.market_addr).await {
                    Ok((_run, sig)) => match self.ctx.market.await_tx(sig).await {
                        Ok(TxOutcome::Confirmed) => self.state = WorkLoopState::Queued,
                        Ok(TxOutcome::Failed { reason }) => {
                            tracing::warn!(reason, "enter_market transaction failed; retrying next tick");
                        }
                        Ok(TxOutcome::TimedOut) => {
                            tracing::warn!("enter_market confirmation timed out; retrying next tick");
                        }
                        Err(err) => self.log_transient_or_propagate(err)?,
                    },
                    Err(err) => self.log_transient_or_propagate(err)?,
                },
                Err(err) => self.log_transient_or_propagate(err)?,
            },
            Err(err) => self.log_transient_or_propagate(err)?,
        }
        Ok(())
    }

    async fn tick_queued(&mut self) -> Result<(), NodeError> {
        match self.find_next_assigned_run().await {
            Ok(Some((run_addr, run))) => match self.build_or_resume_flow(run.job, run_addr, &run).await {
                Ok(flow_id) => self.state = WorkLoopState::Claimed(flow_id),
                Err(err) => self.log_transient_or_propagate(err)?,
            },
            // No run assigned yet. The market may have dequeued this node
            // without assigning it a run (e.g. `job_timeout` elapsed before
            // a claim landed) — scenario: lost a concurrent claim race.
            // Falling back to `Idle` lets the next tick's `enter_market`
            // retry rather than waiting in a queue slot we no longer hold.
            Ok(None) => match self.is_queued().await {
                Ok(true) => {}
                Ok(false) => self.state = WorkLoopState::Idle,
                Err(err) => self.log_transient_or_propagate(err)?,
            },
            Err(err) => self.log_transient_or_propagate(err)?,
        }
        Ok(())
    }

    /// Drive the Flow Runner until every reachable op has a recorded
    /// status, then hand off to Settling. `advance` itself persists
    /// `results` after each op, so a transient failure partway through
    /// leaves progress durable and this tick simply retries on the next
    /// one, still `Claimed`.
    async fn tick_claimed(&mut self, flow_id: FlowId) -> Result<(), NodeError> {
        let Some(mut flow) = self.ctx.store.load_flow(&flow_id).await? else {
            tracing::warn!(%flow_id, "claimed flow vanished from the store; returning to idle");
            self.state = WorkLoopState::Idle;
            return Ok(());
        };

        let now = now_unix();
        if !flow.is_finished() && !flow.is_expired(now) {
            if let Err(err) = self.ctx.runner.advance(&mut flow, &self.ctx.store, &self.ctx.blob).await {
                self.log_transient_or_propagate(err)?;
                return Ok(());
            }
        }
        self.state = WorkLoopState::Settling(flow_id);
        Ok(())
    }

    async fn tick_settling(&mut self, flow_id: FlowId) -> Result<(), NodeError> {
        let now = now_unix();
        match settlement::process_flow(
            &flow_id,
            &self.ctx.store,
            &self.ctx.market,
            self.ctx.config.market_addr,
            self.ctx.container.as_ref(),
            now,
        )
        .await
        {
            Ok(Some(id)) => self.state = WorkLoopState::Settling(id),
            Ok(None) => self.state = WorkLoopState::Idle,
            Err(err) => self.log_transient_or_propagate(err)?,
        }
        Ok(())
    }

    /// Transient error classes are logged and swallowed so the loop simply
    /// retries next tick in its current state; everything else propagates
    /// to the caller.
    fn log_transient_or_propagate(&self, err: NodeError) -> Result<(), NodeError> {
        if err.is_transient() {
            tracing::warn!(%err, state = ?self.state, "transient error; retrying next tick");
            Ok(())
        } else {
            Err(err)
        }
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
