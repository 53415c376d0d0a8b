use std::path::PathBuf;

use clap::Parser;

/// `worknode`: runs one node process against a single market.
///
/// Precedence, lowest to highest: built-in defaults → `--config` file →
/// these flags / their `WORKNODE_*` environment fallbacks.
#[derive(Debug, Clone, Parser)]
#[command(name = "worknode", version, about = "Worknode: decentralized containerized compute worker")]
pub struct Cli {
    /// Path to a TOML config file layered under these flags.
    #[arg(long, env = "WORKNODE_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Network identifier, informational only.
    #[arg(long, env = "WORKNODE_NETWORK")]
    pub network: Option<String>,

    /// Base58 address of the market this node competes in.
    #[arg(long, env = "WORKNODE_MARKET_ADDR")]
    pub market_addr: Option<String>,

    /// Base58 address of this node, derived from the signer key.
    #[arg(long, env = "WORKNODE_NODE_ADDR")]
    pub node_addr: Option<String>,

    /// Base URL of the chain RPC collaborator.
    #[arg(long, env = "WORKNODE_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Base URL of the content-addressed blob store collaborator.
    #[arg(long, env = "WORKNODE_BLOB_URL")]
    pub blob_url: Option<String>,

    /// Base URL of the container engine collaborator.
    #[arg(long, env = "WORKNODE_CONTAINER_ENGINE_URL")]
    pub container_engine_url: Option<String>,

    /// Path to the raw signer key file. Never logged.
    #[arg(long, env = "WORKNODE_SIGNER_KEY_PATH")]
    pub signer_key_path: Option<PathBuf>,

    /// Bearer credential presented to the blob store.
    #[arg(long, env = "WORKNODE_BLOB_CREDENTIAL")]
    pub blob_credential: Option<String>,

    /// Work loop tick interval, in milliseconds.
    #[arg(long, env = "WORKNODE_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Per-job wall-clock budget, in seconds, used as a local fallback
    /// when a claimed run's flow carries no `expires` of its own.
    #[arg(long, env = "WORKNODE_JOB_TIMEOUT_SECS")]
    pub job_timeout_secs: Option<u64>,

    /// Skip the node-access-key gate.
    #[arg(long, env = "WORKNODE_OPEN_MARKET")]
    pub open_market: Option<bool>,

    /// Directory used for the flow store and other durable local state.
    #[arg(long, env = "WORKNODE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}
