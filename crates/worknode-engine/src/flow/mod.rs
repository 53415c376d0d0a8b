//! The flow subsystem: build, persist, and run the local executable plan
//! derived from a job document.

pub mod builder;
pub mod model;
pub mod runner;
pub mod store;

pub use builder::{BuilderRegistry, FlowBuilder, JobDocument, PipelineFlowBuilder, RefResolvingFlowBuilder};
pub use model::{Flow, FlowId, FlowState, Op, OpId, OpOutcome, RESULT_IPFS_KEY};
pub use runner::{ContainerEngine, FlowRunner, GitDriver};
pub use store::{FileKvStore, FlowStore, KvStore, MemKvStore};
