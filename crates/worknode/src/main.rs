mod cli;
mod config;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use worknode_engine::flow::BuilderRegistry;
use worknode_engine::{
    DockerContainerEngine, HttpChainRpc, HttpObjectStore, NodeContext, ShellGitDriver, ShutdownCoordinator,
    WorkLoop,
};
use worknode_engine::flow::store::FileKvStore;

use crate::cli::Cli;

/// Shells exit code 130 on a forced (second-signal) exit, matching the
/// teacher's own convention for an interrupted process.
const FORCED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let node_config = config::load(&cli)?;

    let rpc = HttpChainRpc::new(node_config.rpc_url.clone());
    let blob_store = HttpObjectStore::new(node_config.blob_url.clone(), node_config.blob_credential.clone());
    let kv = FileKvStore::new(node_config.state_dir.join("flows"));
    let git = Arc::new(ShellGitDriver::new(node_config.state_dir.join("repos")));
    let container = Arc::new(DockerContainerEngine::new(node_config.state_dir.join("logs")));
    let builders = BuilderRegistry::with_defaults();

    let poll_interval = node_config.poll_interval;
    let ctx = NodeContext::new(node_config, rpc, blob_store, kv, git, container, builders);

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
    worknode_engine::shutdown::spawn_signal_handler(shutdown.clone(), shutdown_tx);

    let mut work_loop = WorkLoop::new(ctx, shutdown.clone());
    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(?poll_interval, "worknode starting");

    let mut forced_exit = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = work_loop.tick().await {
                    tracing::error!(%err, "fatal error; exiting");
                    return Err(err.into());
                }
                if work_loop.is_shutting_down() {
                    break;
                }
            }
            signal = shutdown_rx.recv() => {
                match signal {
                    Some(worknode_engine::shutdown::ShutdownSignal::Immediate) => {
                        tracing::warn!("second termination signal received; exiting immediately");
                        forced_exit = true;
                        break;
                    }
                    Some(worknode_engine::shutdown::ShutdownSignal::Graceful) => {
                        tracing::info!("termination signal received; finishing current tick before exit");
                    }
                    None => {}
                }
            }
        }
    }

    if forced_exit {
        std::process::exit(FORCED_EXIT_CODE);
    }

    tracing::info!(state = ?work_loop.state(), "worknode exiting");
    Ok(())
}
