//! On-chain record shapes the node reads and writes. These mirror the
//! program's account layout as a black box: the node only needs the fields
//! named here, never the full IDL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// A 32-byte on-chain address, base58-displayed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl FromStr for Address {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|err| NodeError::Decode(format!("address {s:?}: {err}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| NodeError::Decode(format!("address {s:?}: expected 32 bytes")))?;
        Ok(Address(arr))
    }
}

/// A 64-byte transaction signature, base58-displayed.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub [u8; 64]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", bs58::encode(self.0).into_string())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl FromStr for Signature {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|err| NodeError::Decode(format!("signature {s:?}: {err}")))?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| NodeError::Decode(format!("signature {s:?}: expected 64 bytes")))?;
        Ok(Signature(arr))
    }
}

/// Outcome of polling a submitted transaction for confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// The transaction landed and was confirmed.
    Confirmed,
    /// The transaction landed but the chain rejected it.
    Failed {
        /// Program or runtime error message.
        reason: String,
    },
    /// No confirmation was observed within the retry budget.
    TimedOut,
}

/// On-chain market record: coordinates a queue of worker nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Ordered sequence of node addresses waiting for work.
    pub queue: Vec<Address>,
    /// Seconds a claimed run is allowed to run before it is expired.
    pub job_timeout: u64,
    /// Collection address gating node entry (ignored when open-market).
    pub node_access_key: Address,
}

/// On-chain run record: binds a node to a specific job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// The node that claimed this run.
    pub node: Address,
    /// The job this run executes.
    pub job: Address,
    /// The account that paid to post the job.
    pub payer: Address,
    /// Unix timestamp the run was claimed at.
    pub time: i64,
}

/// On-chain job record: references the off-chain job document by digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 32-byte SHA-256 digest of the job document, as stored on chain.
    pub ipfs_job: [u8; 32],
    /// The market this job was posted into.
    pub market: Address,
    /// Current on-chain lifecycle state.
    pub status: JobStatus,
}

/// Job lifecycle state as tracked on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Posted, waiting for a node to claim it.
    Queued,
    /// Claimed by a node and currently executing.
    Running,
    /// Finished and settled.
    Finished,
}
