//! Integration tests for the two testable-property scenarios not already
//! covered by `work_loop`'s own unit tests: concurrent-claim-lost (the node
//! falls out of the queue without being assigned a run) and restart-mid-flow
//! (a persisted flow resumes from wherever it left off on the last process).
//! Fakes are intentionally separate from `work_loop`'s in-module ones —
//! each test module owns its own fixtures, same as the teacher's own tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use worknode_core::{Address, Cid, ConfigInputs, Job, JobStatus, Market, NodeError, Run, Signature, TxOutcome};
use worknode_engine::health::HealthSnapshot;
use worknode_engine::{ChainRpc, NodeContext, ObjectStore, WorkLoop, WorkLoopState};
use worknode_engine::flow::builder::{JobDocument, PipelineSpec};
use worknode_engine::flow::model::{OpId, OpOutcome};
use worknode_engine::flow::{BuilderRegistry, ContainerEngine, GitDriver, MemKvStore};

const MARKET_ADDR: Address = Address([20; 32]);
const NODE_ADDR: Address = Address([21; 32]);
const JOB_ADDR: Address = Address([22; 32]);
const RUN_ADDR: Address = Address([23; 32]);

struct Inner {
    market: Market,
    jobs: HashMap<Address, Job>,
    my_runs: HashMap<Address, Run>,
    node_balances: HealthSnapshot,
    finish_calls: u32,
    confirm_outcome: TxOutcome,
}

#[derive(Clone)]
struct FakeChainRpc {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl ChainRpc for FakeChainRpc {
    async fn read_market(&self, _market: Address) -> Result<Market, NodeError> {
        Ok(self.inner.lock().unwrap().market.clone())
    }
    async fn read_job(&self, job: Address) -> Result<Job, NodeError> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(&job)
            .cloned()
            .ok_or_else(|| NodeError::Decode(format!("no such job: {job}")))
    }
    async fn read_run(&self, _run: Address) -> Result<Run, NodeError> {
        unimplemented!("not exercised by these tests")
    }
    async fn read_runs_by_node(&self, _node: Address) -> Result<HashMap<Address, Run>, NodeError> {
        Ok(self.inner.lock().unwrap().my_runs.clone())
    }
    async fn read_node_balances(&self, _node: Address) -> Result<HealthSnapshot, NodeError> {
        Ok(self.inner.lock().unwrap().node_balances)
    }
    async fn submit_work(&self, _market: Address) -> Result<(Address, Signature), NodeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.market.queue.push(NODE_ADDR);
        Ok((RUN_ADDR, Signature([5; 64])))
    }
    async fn submit_finish(
        &self,
        _job: Address,
        _run: Address,
        _market: Address,
        _result_digest: [u8; 32],
    ) -> Result<Signature, NodeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.finish_calls += 1;
        Ok(Signature([6; 64]))
    }
    async fn submit_quit(&self, _run: Address) -> Result<Signature, NodeError> {
        Ok(Signature([7; 64]))
    }
    async fn submit_stop(&self, _market: Address) -> Result<Signature, NodeError> {
        Ok(Signature([8; 64]))
    }
    async fn confirm(&self, _sig: Signature) -> Result<TxOutcome, NodeError> {
        Ok(self.inner.lock().unwrap().confirm_outcome.clone())
    }
}

#[derive(Default)]
struct FakeObjectStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put_bytes(&self, bytes: &[u8]) -> Result<Cid, NodeError> {
        let digest: [u8; 32] = Sha256::digest(bytes).into();
        let cid = Cid::encode(digest);
        self.blobs.lock().unwrap().insert(cid.to_string(), bytes.to_vec());
        Ok(cid)
    }
    async fn get_bytes(&self, cid: &Cid) -> Result<Vec<u8>, NodeError> {
        self.blobs
            .lock()
            .unwrap()
            .get(cid.as_str())
            .cloned()
            .ok_or_else(|| NodeError::BlobTransient(format!("no such blob: {cid}")))
    }
}

struct FakeGit;

#[async_trait]
impl GitDriver for FakeGit {
    async fn ensure_repo(&self, _url: &str) -> Result<String, NodeError> {
        Ok("/tmp/repo".to_string())
    }
    async fn checkout(&self, path: &str, _commit: &str) -> Result<String, NodeError> {
        Ok(path.to_string())
    }
    async fn resolve_ref(&self, _path: &str, reference: &str) -> Result<String, NodeError> {
        Ok(reference.to_string())
    }
}

struct FakeContainer;

#[async_trait]
impl ContainerEngine for FakeContainer {
    async fn run(&self, _image: &str, _commands: &[String], _workdir: &str) -> Result<String, NodeError> {
        Ok("/tmp/job.log".to_string())
    }
    async fn collect_logs(&self, _log_path: &str) -> Result<String, NodeError> {
        Ok("hi\n".to_string())
    }
    async fn gc_volumes(&self) -> Result<(), NodeError> {
        Ok(())
    }
    async fn ping(&self) -> Result<(), NodeError> {
        Ok(())
    }
}

fn base_config() -> worknode_core::NodeConfig {
    let path = std::env::temp_dir().join(format!(
        "worknode-scenarios-signer-{:?}",
        std::thread::current().id()
    ));
    std::fs::write(&path, [1u8, 2, 3]).unwrap();

    worknode_core::NodeConfig::assemble(ConfigInputs {
        network: "devnet".to_string(),
        market_addr: MARKET_ADDR.to_string(),
        node_addr: NODE_ADDR.to_string(),
        rpc_url: "http://localhost:1".to_string(),
        blob_url: "http://localhost:2".to_string(),
        container_engine_url: "http://localhost:3".to_string(),
        signer_key_path: path,
        blob_credential: Some("token".to_string()),
        poll_interval_ms: 1000,
        job_timeout_secs: 60,
        open_market: false,
        state_dir: std::env::temp_dir(),
    })
    .unwrap()
}

fn healthy_inner(my_runs: HashMap<Address, Run>) -> Inner {
    Inner {
        market: Market { queue: vec![], job_timeout: 60, node_access_key: Address([0; 32]) },
        jobs: HashMap::new(),
        my_runs,
        node_balances: HealthSnapshot {
            sol_balance: worknode_engine::MIN_SOL_BALANCE,
            nos_balance: 0,
            nft_count: 1,
        },
        finish_calls: 0,
        confirm_outcome: TxOutcome::Confirmed,
    }
}

fn build_ctx(
    rpc: FakeChainRpc,
    blob: FakeObjectStore,
) -> NodeContext<FakeChainRpc, FakeObjectStore, MemKvStore, FakeGit, FakeContainer> {
    NodeContext::new(
        base_config(),
        rpc,
        blob,
        MemKvStore::new(),
        Arc::new(FakeGit),
        Arc::new(FakeContainer),
        BuilderRegistry::with_defaults(),
    )
}

/// Scenario 3: `find_my_runs()` returns `{}` but the node previously
/// submitted `enter_market` and was then silently dequeued (no assigned
/// run ever arrived). The loop must fall back to `Idle` and re-submit
/// `enter_market` on its own, without surfacing an error.
#[tokio::test]
async fn concurrent_claim_lost_reenters_market_after_being_dequeued() {
    let blob = FakeObjectStore::default();
    let inner = healthy_inner(HashMap::new());
    let shared = Arc::new(Mutex::new(inner));
    let rpc = FakeChainRpc { inner: shared.clone() };

    let ctx = build_ctx(rpc, blob);
    let mut work_loop = WorkLoop::new(ctx, Arc::new(worknode_engine::ShutdownCoordinator::new()));

    // First tick: health check resolves to Idle, no run assigned, node
    // enters the market and becomes Queued.
    work_loop.tick().await.unwrap();
    assert_eq!(*work_loop.state(), WorkLoopState::Queued);
    assert!(shared.lock().unwrap().market.queue.contains(&NODE_ADDR));

    // The market dequeues the node behind its back (e.g. a timeout) with
    // no run ever assigned.
    shared.lock().unwrap().market.queue.clear();

    // Queued tick sees no assigned run and notices it is no longer
    // queued; falls back to Idle.
    work_loop.tick().await.unwrap();
    assert_eq!(*work_loop.state(), WorkLoopState::Idle);

    // Next tick re-enters the market without error.
    work_loop.tick().await.unwrap();
    assert_eq!(*work_loop.state(), WorkLoopState::Queued);
    assert!(shared.lock().unwrap().market.queue.contains(&NODE_ADDR));
}

/// Scenario 4: a flow persisted with `docker-cmds` already recorded (but no
/// `result/ipfs`) from a previous process is resumed after restart by
/// looking it up via the job→flow index, and runs to completion.
#[tokio::test]
async fn restart_mid_flow_resumes_and_finishes() {
    let blob = FakeObjectStore::default();

    let doc = JobDocument {
        job_type: "Pipeline".to_string(),
        url: "https://example.com/repo.git".to_string(),
        commit: "abc123".to_string(),
        pipeline: PipelineSpec { image: "alpine".to_string(), commands: vec!["echo hi".to_string()] },
        state: serde_json::json!({}),
    };
    let doc_bytes = serde_json::to_vec(&doc).unwrap();
    let digest: [u8; 32] = Sha256::digest(&doc_bytes).into();
    let doc_cid = Cid::encode(digest);
    blob.blobs.lock().unwrap().insert(doc_cid.to_string(), doc_bytes);

    let mut inner = healthy_inner(HashMap::from([(
        RUN_ADDR,
        Run { node: NODE_ADDR, job: JOB_ADDR, payer: Address([9; 32]), time: 0 },
    )]));
    inner.jobs.insert(JOB_ADDR, Job { ipfs_job: digest, market: MARKET_ADDR, status: JobStatus::Running });
    let shared = Arc::new(Mutex::new(inner));
    let rpc = FakeChainRpc { inner: shared.clone() };

    let ctx = build_ctx(rpc, blob);

    // Build the same flow the builder would, so its id matches, then
    // pre-seed it as though a prior process had already run `clone`,
    // `checkout`, and `docker-cmds` before being killed.
    let registry = BuilderRegistry::with_defaults();
    let mut flow = registry.build(JOB_ADDR, RUN_ADDR, &doc).unwrap();
    flow.results.insert(OpId::new("clone"), OpOutcome::Ok { value: serde_json::json!("/tmp/repo") });
    flow.results.insert(OpId::new("checkout"), OpOutcome::Ok { value: serde_json::json!("/tmp/repo") });
    flow.results.insert(OpId::new("docker-cmds"), OpOutcome::Ok { value: serde_json::json!("/tmp/job.log") });
    assert!(!flow.is_finished());

    ctx.store.assoc_job(JOB_ADDR, &flow.id).await.unwrap();
    ctx.store.save_flow(&flow).await.unwrap();
    let flow_id = flow.id.clone();

    let mut work_loop = WorkLoop::new(ctx, Arc::new(worknode_engine::ShutdownCoordinator::new()));

    // Boot: health check -> Idle.
    work_loop.tick().await.unwrap();
    assert_eq!(*work_loop.state(), WorkLoopState::Idle);

    // Idle tick finds the assigned run, resolves the existing flow via
    // the job->flow index rather than rebuilding it, and claims it.
    work_loop.tick().await.unwrap();
    assert_eq!(*work_loop.state(), WorkLoopState::Claimed(flow_id.clone()));

    // Claimed tick only has `wrap-up` left to run.
    work_loop.tick().await.unwrap();
    assert_eq!(*work_loop.state(), WorkLoopState::Settling(flow_id));

    // Settling finishes the job.
    work_loop.tick().await.unwrap();
    assert_eq!(*work_loop.state(), WorkLoopState::Idle);
    assert_eq!(shared.lock().unwrap().finish_calls, 1);
}
