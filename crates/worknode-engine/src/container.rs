//! Default [`ContainerEngine`](crate::flow::ContainerEngine) collaborator:
//! shells out to the system `docker` binary. As with [`ShellGitDriver`]
//! this is a thin, swappable adapter — the trait boundary in
//! [`flow::runner`](crate::flow::runner) is the actual contribution.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::process::Command;
use worknode_core::NodeError;

use crate::flow::ContainerEngine;

/// Runs one container per `run` call and streams its combined stdout/stderr
/// to a file under `logs_dir`, mirroring the "stream logs to file" contract
/// the spec lists for this collaborator.
pub struct DockerContainerEngine {
    logs_dir: PathBuf,
}

impl DockerContainerEngine {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self { logs_dir: logs_dir.into() }
    }
}

#[async_trait]
impl ContainerEngine for DockerContainerEngine {
    async fn run(&self, image: &str, commands: &[String], workdir: &str) -> Result<String, NodeError> {
        tokio::fs::create_dir_all(&self.logs_dir).await?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let log_path = self.logs_dir.join(format!("{stamp}.log"));

        let script = commands.join(" && ");
        let output = Command::new("docker")
            .arg("run")
            .arg("--rm")
            .arg("-v")
            .arg(format!("{workdir}:/root"))
            .arg("-w")
            .arg("/root")
            .arg(image)
            .arg("sh")
            .arg("-c")
            .arg(&script)
            .output()
            .await
            .map_err(|err| NodeError::ContainerUnreachable(err.to_string()))?;

        let mut contents = Vec::with_capacity(output.stdout.len() + output.stderr.len());
        contents.extend_from_slice(&output.stdout);
        contents.extend_from_slice(&output.stderr);
        tokio::fs::write(&log_path, &contents).await?;

        if !output.status.success() {
            return Err(NodeError::OpFailed {
                op: "docker.run".to_string(),
                message: format!("container exited with {}", output.status),
            });
        }
        Ok(log_path.to_string_lossy().into_owned())
    }

    async fn collect_logs(&self, log_path: &str) -> Result<String, NodeError> {
        let bytes = tokio::fs::read(log_path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn gc_volumes(&self) -> Result<(), NodeError> {
        let output = Command::new("docker")
            .arg("volume")
            .arg("prune")
            .arg("-f")
            .output()
            .await
            .map_err(|err| NodeError::ContainerUnreachable(err.to_string()))?;
        if !output.status.success() {
            return Err(NodeError::ContainerUnreachable(format!(
                "docker volume prune exited with {}",
                output.status
            )));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), NodeError> {
        let output = Command::new("docker")
            .arg("info")
            .output()
            .await
            .map_err(|err| NodeError::ContainerUnreachable(err.to_string()))?;
        if !output.status.success() {
            return Err(NodeError::ContainerUnreachable(format!(
                "docker info exited with {}",
                output.status
            )));
        }
        Ok(())
    }
}
