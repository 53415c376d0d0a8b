//! Flow Store: persist and recover flow records, and maintain the
//! job-address → flow-id index. Wraps the embedded key/value persistence
//! collaborator (get/put/assoc by key, ordered, durable).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use worknode_core::{Address, NodeError};

use super::model::{Flow, FlowId};

/// The embedded key/value persistence collaborator: get/put by key,
/// durable before the next write is observed.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NodeError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), NodeError>;
}

/// Flow Store built on top of a [`KvStore`]. Owns the `<flow-id> → Flow`
/// and `[:job->flow, <job-addr>] → flow-id` keyspaces exclusively.
pub struct FlowStore<K> {
    kv: K,
}

fn job_index_key(job: Address) -> String {
    format!("job->flow:{job}")
}

impl<K: KvStore> FlowStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Persist a flow's current definition and results. Durable before
    /// this call returns, per the store's ordering contract.
    pub async fn save_flow(&self, flow: &Flow) -> Result<(), NodeError> {
        let bytes = serde_json::to_vec(flow)?;
        self.kv.put(&flow.id.0, bytes).await
    }

    /// Load a previously persisted flow by id.
    pub async fn load_flow(&self, id: &FlowId) -> Result<Option<Flow>, NodeError> {
        match self.kv.get(&id.0).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Associate a job address with a flow id. Monotonic: if the index
    /// already names a *different* flow id for this job, the existing
    /// mapping wins and this call is a no-op rather than an overwrite —
    /// once written, a job→flow mapping is never retargeted.
    pub async fn assoc_job(&self, job: Address, id: &FlowId) -> Result<(), NodeError> {
        if let Some(existing) = self.flow_id_for_job(job).await? {
            if existing != *id {
                tracing::warn!(
                    %job, existing = %existing, attempted = %id,
                    "job->flow mapping already set; ignoring new id"
                );
            }
            return Ok(());
        }
        self.kv.put(&job_index_key(job), id.0.clone().into_bytes()).await
    }

    /// Look up the flow id previously associated with a job address.
    pub async fn flow_id_for_job(&self, job: Address) -> Result<Option<FlowId>, NodeError> {
        match self.kv.get(&job_index_key(job)).await? {
            Some(bytes) => Ok(Some(FlowId(String::from_utf8_lossy(&bytes).into_owned()))),
            None => Ok(None),
        }
    }
}

/// Default durable [`KvStore`]: one file per key under a state directory,
/// written via write-to-temp-then-rename so readers never observe a
/// partial write. Mirrors the teacher's inflight-lease store.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are internally generated (flow ids are hex, job index keys
        // are `job->flow:<base58>`), so a simple escape keeps them
        // filesystem-safe without pulling in a path-sanitizing crate.
        let escaped: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(escaped)
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NodeError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), NodeError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// In-memory [`KvStore`] used by tests and as a building block for other
/// in-process callers that need a shared, cloneable handle.
#[derive(Clone, Default)]
pub struct MemKvStore {
    inner: Arc<tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NodeError> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), NodeError> {
        self.inner.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::model::{FlowState, OpOutcome};
    use std::collections::BTreeMap;

    fn sample_flow(id: &str, job: Address, run: Address) -> Flow {
        Flow {
            id: FlowId(id.to_string()),
            ops: vec![],
            state: FlowState {
                job_type: "Pipeline".to_string(),
                job_addr: job,
                run_addr: run,
                repo: "repo".to_string(),
                commit_sha: "sha".to_string(),
                carried: serde_json::json!({}),
            },
            results: BTreeMap::new(),
            expires: None,
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let store = FlowStore::new(MemKvStore::new());
        let flow = sample_flow("flow-1", Address([1; 32]), Address([2; 32]));
        store.save_flow(&flow).await.unwrap();
        let loaded = store.load_flow(&flow.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, flow.id);
    }

    #[tokio::test]
    async fn job_flow_mapping_is_monotonic() {
        let store = FlowStore::new(MemKvStore::new());
        let job = Address([3; 32]);
        let first = FlowId("flow-a".to_string());
        let second = FlowId("flow-b".to_string());

        store.assoc_job(job, &first).await.unwrap();
        store.assoc_job(job, &second).await.unwrap();

        assert_eq!(store.flow_id_for_job(job).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn results_grow_without_retracting() {
        let store = FlowStore::new(MemKvStore::new());
        let mut flow = sample_flow("flow-2", Address([4; 32]), Address([5; 32]));
        flow.results.insert(
            crate::flow::model::OpId::new("clone"),
            OpOutcome::Ok { value: serde_json::json!("/tmp/repo") },
        );
        store.save_flow(&flow).await.unwrap();

        flow.results.insert(
            crate::flow::model::OpId::new("checkout"),
            OpOutcome::Ok { value: serde_json::json!("/tmp/repo") },
        );
        store.save_flow(&flow).await.unwrap();

        let loaded = store.load_flow(&flow.id).await.unwrap().unwrap();
        assert_eq!(loaded.results.len(), 2);
    }
}
