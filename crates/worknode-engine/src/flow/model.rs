//! The flow record: a deterministic, executable plan derived from a job
//! document, and the unit of work persisted on disk.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use worknode_core::Address;

/// Opaque, content-hashed flow identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single operation within a flow, stable across runs
/// (e.g. `"clone"`, `"checkout"`, `"docker-cmds"`, `"wrap-up"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId(pub String);

impl OpId {
    pub fn new(s: impl Into<String>) -> Self {
        OpId(s.into())
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single operation in a flow's op graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Op {
    /// The kind of effect this op performs, e.g. `"git.ensure-repo"`.
    pub op: String,
    /// This op's stable id within the flow.
    pub id: OpId,
    /// Arguments passed to the effect, op-kind specific.
    pub args: serde_json::Value,
    /// Ops that must have a recorded status before this one may run.
    pub deps: BTreeSet<OpId>,
    /// Whether this is the flow's unique terminal effect.
    pub terminal: bool,
}

/// Recorded outcome of one op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OpOutcome {
    /// The op completed and produced a value.
    Ok { value: serde_json::Value },
    /// The op failed, either directly or because an upstream dependency
    /// failed first.
    Error { message: String, upstream: bool },
}

impl OpOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, OpOutcome::Ok { .. })
    }
}

/// State embedded in a flow at build time: the fields a builder carries
/// forward from the job document plus the run/job addresses it was built
/// for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    pub job_type: String,
    pub job_addr: Address,
    pub run_addr: Address,
    pub repo: String,
    pub commit_sha: String,
    /// Carried-forward `state` object from the job document (e.g.
    /// `nosana/secrets`), opaque to the core.
    pub carried: serde_json::Value,
}

/// A local, executable plan derived from a job document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub ops: Vec<Op>,
    pub state: FlowState,
    pub results: BTreeMap<OpId, OpOutcome>,
    /// Absolute unix timestamp after which the flow is considered
    /// expired, if any.
    pub expires: Option<i64>,
}

/// Key under which the terminal op's uploaded result CID is recorded.
pub const RESULT_IPFS_KEY: &str = "result/ipfs";

impl Flow {
    /// A flow is finished once its terminal op recorded a result CID.
    pub fn is_finished(&self) -> bool {
        self.results
            .get(&OpId::new(RESULT_IPFS_KEY))
            .is_some_and(OpOutcome::is_ok)
    }

    /// A flow is expired once `now` has passed its deadline.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires.is_some_and(|deadline| now > deadline)
    }

    /// Every op that has not yet recorded any status, in their declared
    /// order, without regard to dependency order (callers schedule).
    pub fn pending_ops(&self) -> impl Iterator<Item = &Op> {
        self.ops.iter().filter(|op| !self.results.contains_key(&op.id))
    }

    /// Deterministic content hash over the op graph and flow-defining
    /// state (excluding `results`/`expires`, which change as the flow
    /// runs). Two builds of the same job document must produce the same
    /// id.
    pub fn compute_id(ops: &[Op], state: &FlowState) -> FlowId {
        #[derive(Serialize)]
        struct Canonical<'a> {
            ops: &'a [Op],
            job_type: &'a str,
            repo: &'a str,
            commit_sha: &'a str,
            carried: &'a serde_json::Value,
        }

        let canonical = Canonical {
            ops,
            job_type: &state.job_type,
            repo: &state.repo,
            commit_sha: &state.commit_sha,
            carried: &state.carried,
        };
        // `job_addr`/`run_addr` are intentionally excluded: the id must be
        // stable for identical job documents regardless of which run
        // claimed them.
        let bytes = serde_json::to_vec(&canonical).expect("flow definition is always serializable");
        let digest = Sha256::digest(&bytes);
        FlowId(hex_encode(&digest))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}
