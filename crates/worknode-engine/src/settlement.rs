//! Settlement: upload already happened as part of the flow's `wrap-up` op;
//! this module composes the finish/quit transaction and reconciles local
//! state with confirmed chain state.

use worknode_core::{Address, Cid, NodeError, TxOutcome};

use crate::flow::model::FlowId;
use crate::flow::runner::finished;
use crate::flow::store::{FlowStore, KvStore};
use crate::market::ChainRpc;
use crate::market::MarketClient;

/// Outcome of processing one tick of an active flow: either it is still
/// outstanding (return its id so the loop keeps polling it) or it has been
/// fully settled (return `None`).
pub type SettleOutcome = Option<FlowId>;

/// `process_flow(flow_id)` per spec §4.7. Loads the flow, and:
/// 1. if finished: gc volumes, submit `finish`, await confirmation;
/// 2. else if expired: submit `quit`;
/// 3. else: still running, return the id unchanged.
pub async fn process_flow<K, R, C>(
    flow_id: &FlowId,
    store: &FlowStore<K>,
    market: &MarketClient<R>,
    market_addr: Address,
    container: &C,
    now: i64,
) -> Result<SettleOutcome, NodeError>
where
    K: KvStore,
    R: ChainRpc,
    C: crate::flow::runner::ContainerEngine,
{
    let Some(flow) = store.load_flow(flow_id).await? else {
        // The flow was persisted and then vanished from the store; nothing
        // left to settle against.
        return Ok(None);
    };

    if finished(&flow) {
        container.gc_volumes().await?;

        let result_cid = result_cid(&flow)?;
        let digest = Cid::decode(result_cid.as_str())?;

        let sig = market
            .finish_job(flow.state.job_addr, flow.state.run_addr, market_addr, digest)
            .await?;
        return match market.await_tx(sig).await? {
            TxOutcome::Confirmed => Ok(None),
            TxOutcome::Failed { .. } | TxOutcome::TimedOut => Ok(Some(flow_id.clone())),
        };
    }

    if flow.is_expired(now) {
        let sig = market.quit_job(flow.state.run_addr).await?;
        return match market.await_tx(sig).await? {
            TxOutcome::Confirmed => Ok(None),
            TxOutcome::Failed { .. } | TxOutcome::TimedOut => Ok(Some(flow_id.clone())),
        };
    }

    Ok(Some(flow_id.clone()))
}

fn result_cid(flow: &crate::flow::model::Flow) -> Result<Cid, NodeError> {
    use crate::flow::model::{OpId, OpOutcome, RESULT_IPFS_KEY};
    match flow.results.get(&OpId::new(RESULT_IPFS_KEY)) {
        Some(OpOutcome::Ok { value }) => {
            let s = value
                .as_str()
                .ok_or_else(|| NodeError::Decode("result/ipfs value is not a string".to_string()))?;
            Ok(Cid::from_string(s.to_string()))
        }
        _ => Err(NodeError::Decode("flow has no recorded result/ipfs cid".to_string())),
    }
}
