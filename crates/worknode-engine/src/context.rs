//! `NodeContext`: the explicit, `Arc`-cloneable bundle of collaborators
//! passed to every top-level operation. Replaces the ambient system map
//! the source carries with a value threaded through call sites.

use std::sync::Arc;

use worknode_core::NodeConfig;

use crate::blob::{BlobClient, ObjectStore};
use crate::flow::store::{FlowStore, KvStore};
use crate::flow::{BuilderRegistry, ContainerEngine, FlowRunner, GitDriver};
use crate::market::{ChainRpc, MarketClient};

/// Everything a tick of the work loop needs, bundled so no module reaches
/// for global state.
pub struct NodeContext<R, S, K, G, C> {
    pub config: NodeConfig,
    pub market: MarketClient<R>,
    pub blob: BlobClient<S>,
    pub store: FlowStore<K>,
    pub runner: FlowRunner<G, C>,
    /// Kept alongside the runner's own handle so the health probe and
    /// Settlement's volume GC can reach the container engine without the
    /// runner giving up its reference.
    pub container: Arc<C>,
    pub builders: BuilderRegistry,
}

impl<R, S, K, G, C> NodeContext<R, S, K, G, C>
where
    R: ChainRpc,
    S: ObjectStore,
    K: KvStore,
    G: GitDriver,
    C: ContainerEngine,
{
    pub fn new(
        config: NodeConfig,
        rpc: R,
        blob_store: S,
        kv: K,
        git: Arc<G>,
        container: Arc<C>,
        builders: BuilderRegistry,
    ) -> Self {
        Self {
            config,
            market: MarketClient::new(rpc),
            blob: BlobClient::new(blob_store),
            store: FlowStore::new(kv),
            runner: FlowRunner::new(git, container.clone()),
            container,
            builders,
        }
    }
}
