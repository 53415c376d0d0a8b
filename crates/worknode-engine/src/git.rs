//! Default [`GitDriver`](crate::flow::GitDriver) collaborator: shells out to
//! the system `git` binary. Thin and swappable, mirroring the pattern of
//! [`HttpChainRpc`](crate::market::HttpChainRpc) and
//! [`HttpObjectStore`](crate::blob::HttpObjectStore) — not the contribution
//! under test, the trait boundary is.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use worknode_core::NodeError;

use crate::flow::GitDriver;

/// Clones repos under `base_dir/<sha256(url)>`, re-fetching in place on
/// repeat calls for the same url rather than re-cloning.
pub struct ShellGitDriver {
    base_dir: PathBuf,
}

impl ShellGitDriver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn repo_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let name: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
        self.base_dir.join(name)
    }

    async fn run(cmd: &mut Command) -> Result<String, NodeError> {
        let output = cmd.output().await.map_err(|err| NodeError::OpFailed {
            op: "git".to_string(),
            message: format!("spawning git failed: {err}"),
        })?;
        if !output.status.success() {
            return Err(NodeError::OpFailed {
                op: "git".to_string(),
                message: format!(
                    "git exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitDriver for ShellGitDriver {
    async fn ensure_repo(&self, url: &str) -> Result<String, NodeError> {
        let path = self.repo_path(url);
        if Path::new(&path).join(".git").exists() {
            Self::run(Command::new("git").arg("-C").arg(&path).arg("fetch").arg("--all")).await?;
        } else {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            Self::run(Command::new("git").arg("clone").arg(url).arg(&path)).await?;
        }
        Ok(path.to_string_lossy().into_owned())
    }

    async fn checkout(&self, path: &str, commit: &str) -> Result<String, NodeError> {
        Self::run(Command::new("git").arg("-C").arg(path).arg("checkout").arg("--force").arg(commit)).await?;
        Ok(path.to_string())
    }

    async fn resolve_ref(&self, path: &str, reference: &str) -> Result<String, NodeError> {
        Self::run(Command::new("git").arg("-C").arg(path).arg("rev-parse").arg(reference)).await
    }
}
