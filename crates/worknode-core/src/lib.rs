#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared types for the worknode workspace: on-chain record shapes, the CID
//! codec, configuration, and the node-wide error kind.

pub mod chain;
pub mod cid;
pub mod config;
pub mod error;

pub use chain::{Address, Job, JobStatus, Market, Run, Signature, TxOutcome};
pub use cid::Cid;
pub use config::{ConfigInputs, FileConfig, NodeConfig};
pub use error::NodeError;
