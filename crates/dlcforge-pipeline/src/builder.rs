//! Image build and push through the external container build tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use dlcforge_core::{ForgeError, ImageSpec, Processor, Result};

/// Options describing how one track's image is produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildOptions {
    /// Dockerfile flavor, e.g. `dlc` for deep-learning-container bases.
    pub dockerfile_type: String,

    /// Base name of the image being assembled,
    /// e.g. `sagemaker-tensorflow-training`.
    pub docker_base_name: String,

    pub processor: Processor,

    pub framework_version: String,
}

impl BuildOptions {
    pub fn new(
        dockerfile_type: impl Into<String>,
        docker_base_name: impl Into<String>,
        processor: Processor,
        framework_version: impl Into<String>,
    ) -> Self {
        Self {
            dockerfile_type: dockerfile_type.into(),
            docker_base_name: docker_base_name.into(),
            processor,
            framework_version: framework_version.into(),
        }
    }

    /// Dockerfile path relative to the build context,
    /// e.g. `docker/Dockerfile.dlc.cpu`.
    pub fn dockerfile(&self) -> PathBuf {
        PathBuf::from(format!(
            "docker/Dockerfile.{}.{}",
            self.dockerfile_type, self.processor
        ))
    }
}

/// Container build tool, consumed as an opaque collaborator.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build the image and push it under the given coordinates.
    async fn build_and_push(&self, options: &BuildOptions, image: &ImageSpec) -> Result<()>;
}

/// Builds and pushes through the `docker` CLI.
pub struct DockerCliBuilder {
    context_dir: PathBuf,
}

impl DockerCliBuilder {
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
        }
    }

    pub fn context_dir(&self) -> &Path {
        &self.context_dir
    }

    async fn run_docker(&self, args: &[String], what: &str) -> Result<()> {
        let output = Command::new("docker")
            .args(args)
            .current_dir(&self.context_dir)
            .output()
            .await
            .map_err(|e| ForgeError::ImageBuild(format!("failed to run docker: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ForgeError::ImageBuild(format!("{what} failed: {stderr}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for DockerCliBuilder {
    async fn build_and_push(&self, options: &BuildOptions, image: &ImageSpec) -> Result<()> {
        let uri = image.uri();
        let dockerfile = options.dockerfile();

        info!(image = %uri, dockerfile = %dockerfile.display(), "building image");
        let build_args = vec![
            "build".to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            "-t".to_string(),
            uri.clone(),
            "--build-arg".to_string(),
            format!("framework_version={}", options.framework_version),
            "--build-arg".to_string(),
            format!("processor={}", options.processor),
            ".".to_string(),
        ];
        self.run_docker(&build_args, "docker build").await?;

        info!(image = %uri, "pushing image");
        self.run_docker(&["push".to_string(), uri.clone()], "docker push")
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dockerfile_path_per_processor() {
        let opts = BuildOptions::new("dlc", "sagemaker-tensorflow-training", Processor::Cpu, "2.3.1");
        assert_eq!(opts.dockerfile(), PathBuf::from("docker/Dockerfile.dlc.cpu"));

        let opts = BuildOptions::new("dlc", "sagemaker-tensorflow-training", Processor::Gpu, "2.3.1");
        assert_eq!(opts.dockerfile(), PathBuf::from("docker/Dockerfile.dlc.gpu"));
    }

    #[test]
    fn test_build_options_roundtrip() {
        let opts = BuildOptions::new("tf", "training", Processor::Cpu, "2.3.1");
        let json = serde_json::to_string(&opts).unwrap();
        let back: BuildOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }
}
