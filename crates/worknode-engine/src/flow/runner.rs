//! Flow Runner: advance a flow's operations in topological order,
//! persisting each result before the next op starts.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use worknode_core::NodeError;

use super::model::{Flow, OpId, OpOutcome, RESULT_IPFS_KEY};
use super::store::{FlowStore, KvStore};
use crate::blob::BlobClient;

/// The container engine collaborator: run an image with a command,
/// stream its logs to a file, and garbage-collect leftover volumes.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Run `image` with `commands`, mounting `workdir` into the
    /// container, and return the path of the file its logs were
    /// streamed to.
    async fn run(
        &self,
        image: &str,
        commands: &[String],
        workdir: &str,
    ) -> Result<String, NodeError>;

    /// Read back the full contents of a log file produced by `run`.
    async fn collect_logs(&self, log_path: &str) -> Result<String, NodeError>;

    /// Reclaim volumes left behind by finished runs.
    async fn gc_volumes(&self) -> Result<(), NodeError>;

    /// Cheap reachability probe for the health monitor.
    async fn ping(&self) -> Result<(), NodeError>;
}

/// The source-control collaborator backing `git.*` ops.
#[async_trait]
pub trait GitDriver: Send + Sync {
    /// Ensure a local clone of `url` exists, returning its local path.
    async fn ensure_repo(&self, url: &str) -> Result<String, NodeError>;

    /// Check out `commit` in the repo at `path`, returning the checkout
    /// path (ops downstream mount this into the container).
    async fn checkout(&self, path: &str, commit: &str) -> Result<String, NodeError>;

    /// Resolve a symbolic ref (PR/MR reference) to a concrete commit SHA,
    /// used by the Github/Gitlab builder variants ahead of `checkout`.
    async fn resolve_ref(&self, path: &str, reference: &str) -> Result<String, NodeError>;
}

/// Advances a flow's ops honoring `deps`, persisting `results` after each
/// step completes.
pub struct FlowRunner<G, C> {
    git: Arc<G>,
    container: Arc<C>,
}

impl<G: GitDriver, C: ContainerEngine> FlowRunner<G, C> {
    pub fn new(git: Arc<G>, container: Arc<C>) -> Self {
        Self { git, container }
    }

    /// Run every reachable op to completion (recorded status), persisting
    /// `results` to `store` after each op. Independent branches continue
    /// even after an unrelated op fails; only ops that transitively
    /// depend on a failure are marked `error` without being executed. The
    /// terminal `wrap-up` op is exempt from that short-circuit: it always
    /// runs once reachable, per spec, so the result document is uploaded
    /// (carrying recorded error statuses) even when an earlier op failed.
    ///
    /// A transient collaborator error (`RpcTransient`/`BlobTransient`/
    /// `ContainerUnreachable`) aborts this call without recording a
    /// result for the in-flight op, leaving it pending so the caller
    /// retries the whole op on the next tick rather than dooming the flow
    /// with a permanent failure it never really had.
    pub async fn advance<B, K>(
        &self,
        flow: &mut Flow,
        store: &FlowStore<K>,
        blob: &BlobClient<B>,
    ) -> Result<(), NodeError>
    where
        B: crate::blob::ObjectStore,
        K: KvStore,
    {
        loop {
            let Some(next) = self.next_runnable(flow) else {
                break;
            };

            let outcome = if next.terminal {
                self.run_wrap_up(flow, blob).await?
            } else if self.upstream_failed(flow, &next.deps) {
                OpOutcome::Error {
                    message: "upstream dependency failed".to_string(),
                    upstream: true,
                }
            } else {
                self.run_effect(flow, &next.op, &next.args).await?
            };

            if next.terminal && outcome.is_ok() {
                // The terminal op's own status and the synthetic
                // `result/ipfs` marker both record the uploaded CID;
                // Settlement only ever looks at the latter.
                flow.results.insert(OpId::new(RESULT_IPFS_KEY), outcome.clone());
            }
            flow.results.insert(next.id.clone(), outcome);
            store.save_flow(flow).await?;
        }
        Ok(())
    }

    fn upstream_failed(&self, flow: &Flow, deps: &BTreeSet<OpId>) -> bool {
        deps.iter().any(|dep| {
            matches!(flow.results.get(dep), Some(OpOutcome::Error { .. }))
        })
    }

    /// The next op whose dependencies all have a recorded status, or
    /// `None` if every reachable op is done.
    fn next_runnable(&self, flow: &Flow) -> Option<super::model::Op> {
        flow.pending_ops()
            .find(|op| op.deps.iter().all(|dep| flow.results.contains_key(dep)))
            .cloned()
    }

    async fn run_effect(&self, flow: &Flow, op: &str, args: &serde_json::Value) -> Result<OpOutcome, NodeError> {
        let result = match op {
            "git.ensure-repo" => {
                let url = args["url"].as_str().unwrap_or_default();
                self.git.ensure_repo(url).await.map(|path| serde_json::json!(path))
            }
            "git.resolve-ref" => {
                let path = resolve_str(flow, args, "path", "path_from");
                let reference = args["ref"].as_str().unwrap_or_default();
                self.git
                    .resolve_ref(&path, reference)
                    .await
                    .map(|sha| serde_json::json!(sha))
            }
            "git.checkout" => {
                let path = resolve_str(flow, args, "path", "path_from");
                let commit = resolve_str(flow, args, "commit", "commit_from");
                self.git
                    .checkout(&path, &commit)
                    .await
                    .map(|path| serde_json::json!(path))
            }
            "docker.run" => {
                let image = args["image"].as_str().unwrap_or_default();
                let workdir = resolve_str(flow, args, "workdir", "workdir_from");
                let commands: Vec<String> = args["commands"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                self.container
                    .run(image, &commands, &workdir)
                    .await
                    .map(|log_path| serde_json::json!(log_path))
            }
            other => Err(NodeError::OpFailed {
                op: other.to_string(),
                message: format!("unknown op kind: {other}"),
            }),
        };

        match result {
            Ok(value) => Ok(OpOutcome::Ok { value }),
            Err(err) if err.is_transient() => Err(err),
            Err(err) => Ok(OpOutcome::Error {
                message: err.to_string(),
                upstream: false,
            }),
        }
    }

    /// The terminal effect: gather the named op outputs, resolve the
    /// container log contents, upload the composite result document, and
    /// record the resulting CID.
    async fn run_wrap_up<B: crate::blob::ObjectStore>(
        &self,
        flow: &Flow,
        blob: &BlobClient<B>,
    ) -> Result<OpOutcome, NodeError> {
        let wanted = ["clone", "checkout", "docker-cmds"];
        let mut selected = serde_json::Map::new();
        for id in wanted {
            let Some(outcome) = flow.results.get(&OpId::new(id)) else {
                continue;
            };
            let value = match outcome {
                OpOutcome::Ok { value } if id == "docker-cmds" => {
                    let log_path = value.as_str().unwrap_or_default();
                    match self.container.collect_logs(log_path).await {
                        Ok(contents) => serde_json::json!(["ok", contents]),
                        Err(err) if err.is_transient() => return Err(err),
                        Err(err) => serde_json::json!(["error", err.to_string()]),
                    }
                }
                OpOutcome::Ok { value } => serde_json::json!(["ok", value]),
                OpOutcome::Error { message, .. } => serde_json::json!(["error", message]),
            };
            selected.insert(id.to_string(), value);
        }

        let document = serde_json::json!({
            "nos-id": flow.id.0,
            "finished-at": chrono::Utc::now().timestamp(),
            "results": selected,
        });

        match blob.put_json(&document).await {
            Ok(cid) => Ok(OpOutcome::Ok { value: serde_json::json!(cid.to_string()) }),
            Err(err) if err.is_transient() => Err(err),
            Err(err) => Ok(OpOutcome::Error {
                message: err.to_string(),
                upstream: false,
            }),
        }
    }
}

/// Resolve a string-valued op argument that may either be given directly
/// under `direct_key` or deferred to an upstream op's recorded output via
/// `from_key` (e.g. `"path_from": "clone"` pulls `flow.results["clone"]`).
/// A `from_key` reference always wins when present.
fn resolve_str(flow: &Flow, args: &serde_json::Value, direct_key: &str, from_key: &str) -> String {
    if let Some(from_op) = args.get(from_key).and_then(|v| v.as_str()) {
        if let Some(OpOutcome::Ok { value }) = flow.results.get(&OpId::new(from_op)) {
            return value.as_str().unwrap_or_default().to_string();
        }
    }
    args.get(direct_key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

/// Convenience check used by Settlement: did the terminal op run and
/// succeed, writing the result CID.
pub fn finished(flow: &Flow) -> bool {
    flow.results
        .get(&OpId::new(RESULT_IPFS_KEY))
        .is_some_and(OpOutcome::is_ok)
}
