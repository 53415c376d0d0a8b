//! Node configuration: immutable for the lifetime of one process.
//!
//! Layering, lowest to highest priority: built-in defaults → `config.toml`
//! → CLI flags / environment variables (the latter two are collapsed by
//! `clap`'s own precedence before they ever reach this module).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::chain::Address;
use crate::error::NodeError;

/// Immutable node configuration for one run of the process.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Network identifier, e.g. `"mainnet"` or `"devnet"`. Informational;
    /// does not itself select an RPC endpoint.
    pub network: String,
    /// Address of the market this node competes in.
    pub market_addr: Address,
    /// This node's own on-chain address, derived from the signer key by a
    /// keypair-management collaborator outside the core's scope and
    /// supplied here so `find_my_runs` has something to filter on.
    pub node_addr: Address,
    /// Base URL of the chain RPC collaborator.
    pub rpc_url: Url,
    /// Base URL of the content-addressed blob store collaborator.
    pub blob_url: Url,
    /// Base URL (or socket path encoded as a URL) of the container engine
    /// collaborator.
    pub container_engine_url: Url,
    /// Raw signer key bytes. Never logged or displayed.
    pub signer_key: Vec<u8>,
    /// Credential presented to the blob store; `None` means unauthenticated
    /// access, which the health monitor flags unless the store allows it.
    pub blob_credential: Option<String>,
    /// Tick interval for the work loop.
    pub poll_interval: Duration,
    /// Per-job wall-clock budget before a claimed run is considered
    /// expired (mirrors the market's own `job_timeout`, used as a local
    /// fallback when the flow itself carries no `expires`).
    pub job_timeout: Duration,
    /// When true, the node skips the node-access-key gate.
    pub open_market: bool,
    /// Directory used for the flow store and other durable local state.
    pub state_dir: std::path::PathBuf,
}

/// Partial configuration as read from `config.toml`. Every field is
/// optional so the file may supply as little or as much as desired; CLI
/// flags and env vars (handled by the caller) fill the rest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub network: Option<String>,
    pub market_addr: Option<String>,
    pub node_addr: Option<String>,
    pub rpc_url: Option<String>,
    pub blob_url: Option<String>,
    pub container_engine_url: Option<String>,
    pub blob_credential: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub job_timeout_secs: Option<u64>,
    pub open_market: Option<bool>,
    pub state_dir: Option<String>,
}

impl FileConfig {
    /// Load a `config.toml` from disk. A missing file is not an error —
    /// it simply yields an empty overlay.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|err| {
            NodeError::Misconfiguration(format!("{}: {err}", path.display()))
        })
    }
}

/// Builder inputs gathered by the CLI layer before producing a
/// [`NodeConfig`]. Each field already reflects CLI-flag/env-var/file
/// precedence as resolved by the caller; this function only validates and
/// assembles the final immutable config.
pub struct ConfigInputs {
    pub network: String,
    pub market_addr: String,
    pub node_addr: String,
    pub rpc_url: String,
    pub blob_url: String,
    pub container_engine_url: String,
    pub signer_key_path: std::path::PathBuf,
    pub blob_credential: Option<String>,
    pub poll_interval_ms: u64,
    pub job_timeout_secs: u64,
    pub open_market: bool,
    pub state_dir: std::path::PathBuf,
}

impl NodeConfig {
    /// Validate and assemble the final config. Any failure here is fatal
    /// at startup (`NodeError::Misconfiguration`), matching the spec's
    /// rule that misconfiguration is the one error kind allowed to abort
    /// the process rather than surface as a log line.
    pub fn assemble(inputs: ConfigInputs) -> Result<Self, NodeError> {
        let market_addr = Address::from_str(&inputs.market_addr)
            .map_err(|err| NodeError::Misconfiguration(format!("market address: {err}")))?;
        let node_addr = Address::from_str(&inputs.node_addr)
            .map_err(|err| NodeError::Misconfiguration(format!("node address: {err}")))?;

        let rpc_url = Url::parse(&inputs.rpc_url)
            .map_err(|err| NodeError::Misconfiguration(format!("rpc url: {err}")))?;
        let blob_url = Url::parse(&inputs.blob_url)
            .map_err(|err| NodeError::Misconfiguration(format!("blob url: {err}")))?;
        let container_engine_url = Url::parse(&inputs.container_engine_url)
            .map_err(|err| NodeError::Misconfiguration(format!("container engine url: {err}")))?;

        let signer_key = std::fs::read(&inputs.signer_key_path).map_err(|err| {
            NodeError::Misconfiguration(format!(
                "signer key {}: {err}",
                inputs.signer_key_path.display()
            ))
        })?;
        if signer_key.is_empty() {
            return Err(NodeError::Misconfiguration(
                "signer key file is empty".to_string(),
            ));
        }

        if inputs.poll_interval_ms == 0 {
            return Err(NodeError::Misconfiguration(
                "poll interval must be >= 1ms".to_string(),
            ));
        }

        Ok(NodeConfig {
            network: inputs.network,
            market_addr,
            node_addr,
            rpc_url,
            blob_url,
            container_engine_url,
            signer_key,
            blob_credential: inputs.blob_credential,
            poll_interval: Duration::from_millis(inputs.poll_interval_ms),
            job_timeout: Duration::from_secs(inputs.job_timeout_secs),
            open_market: inputs.open_market,
            state_dir: inputs.state_dir,
        })
    }
}
