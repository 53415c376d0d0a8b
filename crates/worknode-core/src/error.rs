//! Error kinds shared across the node. One variant per kind named in the
//! core design's error handling section; collaborator traits return
//! `Result<T, NodeError>` so the work loop can match on kind rather than
//! parse strings.

/// A classified node-level failure.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Chain RPC call failed in a way that is expected to clear on retry
    /// (timeout, connection reset, rate limit).
    #[error("rpc transient: {0}")]
    RpcTransient(String),

    /// Chain RPC call failed in a way retrying will not fix (bad signature,
    /// account not found at a stable slot).
    #[error("rpc permanent: {0}")]
    RpcPermanent(String),

    /// An account or document failed to decode into its expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Blob store call failed in a way expected to clear on retry.
    #[error("blob transient: {0}")]
    BlobTransient(String),

    /// Blob store credential is absent or rejected.
    #[error("blob auth: {0}")]
    BlobAuth(String),

    /// Container engine is unreachable.
    #[error("container engine unreachable: {0}")]
    ContainerUnreachable(String),

    /// A flow operation failed; carries the op id that failed.
    #[error("op failed ({op}): {message}")]
    OpFailed {
        /// The operation id that failed.
        op: String,
        /// Human-readable failure detail.
        message: String,
    },

    /// The claimed run's deadline has passed.
    #[error("run expired: {0}")]
    ExpiredRun(String),

    /// Startup configuration is invalid; fatal.
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    /// The node is shutting down and the operation was abandoned.
    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for NodeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            NodeError::RpcTransient(err.to_string())
        } else {
            NodeError::RpcPermanent(err.to_string())
        }
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::BlobTransient(err.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Decode(err.to_string())
    }
}

impl NodeError {
    /// True for the three error classes the work loop treats as "log and
    /// retry next tick" rather than propagating.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::RpcTransient(_) | NodeError::BlobTransient(_) | NodeError::ContainerUnreachable(_)
        )
    }
}
