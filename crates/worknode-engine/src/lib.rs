#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The flow lifecycle engine: market/blob/health collaborators, the flow
//! subsystem (build/persist/run), settlement, and the work loop and
//! shutdown coordinator that drive them.

pub mod blob;
pub mod container;
pub mod context;
pub mod flow;
pub mod git;
pub mod health;
pub mod market;
pub mod settlement;
pub mod shutdown;
pub mod work_loop;

pub use blob::{BlobClient, HttpObjectStore, ObjectStore};
pub use container::DockerContainerEngine;
pub use context::NodeContext;
pub use git::ShellGitDriver;
pub use health::{check, HealthProbe, HealthSnapshot, HealthStatus, UnhealthyReason, MIN_SOL_BALANCE};
pub use market::{ChainRpc, HttpChainRpc, MarketClient};
pub use settlement::process_flow;
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome};
pub use work_loop::{WorkLoop, WorkLoopState};
