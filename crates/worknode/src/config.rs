use worknode_core::{ConfigInputs, FileConfig, NodeConfig, NodeError};

use crate::cli::Cli;

/// Layer built-in defaults, `--config`'s TOML file, and CLI/env flags (in
/// that increasing priority) into the final immutable [`NodeConfig`].
/// Misconfiguration — a required field missing everywhere, or a value
/// `NodeConfig::assemble` rejects — is fatal at startup, never a retried
/// log line.
pub fn load(cli: &Cli) -> Result<NodeConfig, NodeError> {
    let file = FileConfig::load(&cli.config)?;

    let network = cli.network.clone().or(file.network).unwrap_or_else(|| "mainnet".to_string());
    let market_addr = require(cli.market_addr.clone().or(file.market_addr), "market-addr")?;
    let node_addr = require(cli.node_addr.clone().or(file.node_addr), "node-addr")?;
    let rpc_url = require(cli.rpc_url.clone().or(file.rpc_url), "rpc-url")?;
    let blob_url = require(cli.blob_url.clone().or(file.blob_url), "blob-url")?;
    let container_engine_url =
        require(cli.container_engine_url.clone().or(file.container_engine_url), "container-engine-url")?;
    let signer_key_path = cli
        .signer_key_path
        .clone()
        .or_else(|| Some(std::path::PathBuf::from("signer.key")));
    let blob_credential = cli.blob_credential.clone().or(file.blob_credential);
    let poll_interval_ms = cli.poll_interval_ms.or(file.poll_interval_ms).unwrap_or(5_000);
    let job_timeout_secs = cli.job_timeout_secs.or(file.job_timeout_secs).unwrap_or(3_600);
    let open_market = cli.open_market.or(file.open_market).unwrap_or(false);
    let state_dir = cli
        .state_dir
        .clone()
        .or_else(|| file.state_dir.map(std::path::PathBuf::from))
        .unwrap_or_else(|| std::path::PathBuf::from(".worknode"));

    NodeConfig::assemble(ConfigInputs {
        network,
        market_addr,
        node_addr,
        rpc_url,
        blob_url,
        container_engine_url,
        signer_key_path: signer_key_path.expect("defaulted above"),
        blob_credential,
        poll_interval_ms,
        job_timeout_secs,
        open_market,
        state_dir,
    })
}

fn require(value: Option<String>, flag: &str) -> Result<String, NodeError> {
    value.ok_or_else(|| NodeError::Misconfiguration(format!("missing required --{flag} (or its config.toml/env equivalent)")))
}
