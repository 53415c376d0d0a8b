//! Flow Builder: map a fetched job document to a deterministic,
//! executable flow definition.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use worknode_core::{Address, NodeError};

use super::model::{Flow, FlowState, Op, OpId};

/// The off-chain job document, decoded from its CID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDocument {
    #[serde(rename = "type")]
    pub job_type: String,
    pub url: String,
    pub commit: String,
    pub pipeline: PipelineSpec,
    #[serde(default)]
    pub state: serde_json::Value,
}

/// The `pipeline` field of a job document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub image: String,
    pub commands: Vec<String>,
}

/// Maps a job document to an executable [`Flow`]. Implementations are
/// registered under a `nosana/job-type` tag in a [`BuilderRegistry`].
pub trait FlowBuilder: Send + Sync {
    fn build(&self, job_addr: Address, run_addr: Address, doc: &JobDocument) -> Result<Flow, NodeError>;
}

fn op(id: &str, kind: &str, args: serde_json::Value, deps: &[&str], terminal: bool) -> Op {
    Op {
        op: kind.to_string(),
        id: OpId::new(id),
        args,
        deps: deps.iter().map(|d| OpId::new(*d)).collect::<BTreeSet<_>>(),
        terminal,
    }
}

fn flow_state(job_type: &str, job_addr: Address, run_addr: Address, doc: &JobDocument) -> FlowState {
    FlowState {
        job_type: job_type.to_string(),
        job_addr,
        run_addr,
        repo: doc.url.clone(),
        commit_sha: doc.commit.clone(),
        carried: doc.state.clone(),
    }
}

fn assemble(ops: Vec<Op>, state: FlowState, expires: Option<i64>) -> Flow {
    let id = Flow::compute_id(&ops, &state);
    Flow { id, ops, state, results: Default::default(), expires }
}

/// Default builder: `clone → checkout → docker-cmds → wrap-up`.
pub struct PipelineFlowBuilder;

impl FlowBuilder for PipelineFlowBuilder {
    fn build(&self, job_addr: Address, run_addr: Address, doc: &JobDocument) -> Result<Flow, NodeError> {
        let ops = vec![
            op("clone", "git.ensure-repo", serde_json::json!({ "url": doc.url }), &[], false),
            op(
                "checkout",
                "git.checkout",
                serde_json::json!({ "path_from": "clone", "commit": doc.commit }),
                &["clone"],
                false,
            ),
            op(
                "docker-cmds",
                "docker.run",
                serde_json::json!({
                    "image": doc.pipeline.image,
                    "commands": doc.pipeline.commands,
                    "workdir_from": "checkout",
                }),
                &["checkout"],
                false,
            ),
            op("wrap-up", "core.wrap-up", serde_json::json!({}), &["docker-cmds"], true),
        ];
        let state = flow_state("Pipeline", job_addr, run_addr, doc);
        Ok(assemble(ops, state, None))
    }
}

/// Variant used for `"Github"`/`"Gitlab"` job documents: resolves a
/// symbolic PR/MR ref to a concrete commit before checking it out. The
/// spec names these as separate registry entries without describing
/// their op graph; this is the minimal graph consistent with the
/// Pipeline builder plus a ref-resolution step ahead of checkout.
pub struct RefResolvingFlowBuilder {
    job_type: &'static str,
}

impl RefResolvingFlowBuilder {
    pub fn github() -> Self {
        Self { job_type: "Github" }
    }

    pub fn gitlab() -> Self {
        Self { job_type: "Gitlab" }
    }
}

impl FlowBuilder for RefResolvingFlowBuilder {
    fn build(&self, job_addr: Address, run_addr: Address, doc: &JobDocument) -> Result<Flow, NodeError> {
        let ops = vec![
            op("clone", "git.ensure-repo", serde_json::json!({ "url": doc.url }), &[], false),
            op(
                "resolve-ref",
                "git.resolve-ref",
                serde_json::json!({ "path_from": "clone", "ref": doc.commit }),
                &["clone"],
                false,
            ),
            op(
                "checkout",
                "git.checkout",
                serde_json::json!({ "path_from": "clone", "commit_from": "resolve-ref" }),
                &["resolve-ref"],
                false,
            ),
            op(
                "docker-cmds",
                "docker.run",
                serde_json::json!({
                    "image": doc.pipeline.image,
                    "commands": doc.pipeline.commands,
                    "workdir_from": "checkout",
                }),
                &["checkout"],
                false,
            ),
            op("wrap-up", "core.wrap-up", serde_json::json!({}), &["docker-cmds"], true),
        ];
        let state = flow_state(self.job_type, job_addr, run_addr, doc);
        Ok(assemble(ops, state, None))
    }
}

/// Dispatches `job.type` to a registered [`FlowBuilder`], defaulting to
/// `"Pipeline"` when the tag is unrecognized.
pub struct BuilderRegistry {
    builders: HashMap<String, Arc<dyn FlowBuilder>>,
}

impl BuilderRegistry {
    /// The default registry: `Pipeline`, `Github`, `Gitlab`.
    pub fn with_defaults() -> Self {
        let mut builders: HashMap<String, Arc<dyn FlowBuilder>> = HashMap::new();
        builders.insert("Pipeline".to_string(), Arc::new(PipelineFlowBuilder));
        builders.insert("Github".to_string(), Arc::new(RefResolvingFlowBuilder::github()));
        builders.insert("Gitlab".to_string(), Arc::new(RefResolvingFlowBuilder::gitlab()));
        Self { builders }
    }

    /// Register (or replace) the builder for a job-type tag.
    pub fn register(&mut self, job_type: impl Into<String>, builder: Arc<dyn FlowBuilder>) {
        self.builders.insert(job_type.into(), builder);
    }

    pub fn build(&self, job_addr: Address, run_addr: Address, doc: &JobDocument) -> Result<Flow, NodeError> {
        let builder = self
            .builders
            .get(doc.job_type.as_str())
            .or_else(|| self.builders.get("Pipeline"))
            .ok_or_else(|| NodeError::Misconfiguration("no default flow builder registered".to_string()))?;
        builder.build(job_addr, run_addr, doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> JobDocument {
        JobDocument {
            job_type: "Pipeline".to_string(),
            url: "https://example.com/repo.git".to_string(),
            commit: "abc123".to_string(),
            pipeline: PipelineSpec {
                image: "alpine".to_string(),
                commands: vec!["echo hi".to_string()],
            },
            state: serde_json::json!({}),
        }
    }

    #[test]
    fn build_is_stable_for_identical_job_docs() {
        let registry = BuilderRegistry::with_defaults();
        let doc = sample_doc();
        let a = registry.build(Address([1; 32]), Address([2; 32]), &doc).unwrap();
        let b = registry.build(Address([1; 32]), Address([9; 32]), &doc).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn unknown_job_type_falls_back_to_pipeline() {
        let registry = BuilderRegistry::with_defaults();
        let mut doc = sample_doc();
        doc.job_type = "SomethingElse".to_string();
        let flow = registry.build(Address([1; 32]), Address([2; 32]), &doc).unwrap();
        assert_eq!(flow.ops.len(), 4);
        assert_eq!(flow.ops[0].id, OpId::new("clone"));
    }

    #[test]
    fn github_builder_inserts_resolve_ref_before_checkout() {
        let registry = BuilderRegistry::with_defaults();
        let mut doc = sample_doc();
        doc.job_type = "Github".to_string();
        let flow = registry.build(Address([1; 32]), Address([2; 32]), &doc).unwrap();
        let ids: Vec<String> = flow.ops.iter().map(|op| op.id.0.clone()).collect();
        assert_eq!(ids, vec!["clone", "resolve-ref", "checkout", "docker-cmds", "wrap-up"]);
    }

    #[test]
    fn wrap_up_is_the_unique_terminal_op() {
        let registry = BuilderRegistry::with_defaults();
        let flow = registry.build(Address([1; 32]), Address([2; 32]), &sample_doc()).unwrap();
        let terminal: Vec<_> = flow.ops.iter().filter(|op| op.terminal).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].id, OpId::new("wrap-up"));
    }
}
