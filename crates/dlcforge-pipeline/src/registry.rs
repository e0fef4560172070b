//! Registry operations for transient test images.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use dlcforge_core::{ForgeError, ImageSpec, Result};

/// Registry service, consumed as an opaque collaborator.
///
/// The real implementation shells out to the AWS CLI; tests use
/// [`crate::fakes::MemoryRegistry`].
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Delete one pushed tag.
    async fn delete_image(&self, image: &ImageSpec) -> Result<()>;
}

/// Deletes tags via `aws ecr batch-delete-image`.
pub struct EcrCliRegistry;

#[async_trait]
impl ImageRegistry for EcrCliRegistry {
    async fn delete_image(&self, image: &ImageSpec) -> Result<()> {
        let image_id = format!("imageTag={}", image.tag);
        let output = Command::new("aws")
            .args([
                "ecr",
                "batch-delete-image",
                "--repository-name",
                &image.repository,
                "--region",
                &image.region,
                "--image-ids",
                &image_id,
            ])
            .output()
            .await
            .map_err(|e| ForgeError::Registry(format!("failed to run aws cli: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ForgeError::Registry(format!(
                "batch-delete-image failed for {}: {stderr}",
                image.uri()
            )));
        }

        // The CLI exits 0 even when the registry rejects individual images;
        // per-image failures come back in the JSON body.
        let body: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        if let Some(failures) = body.get("failures").and_then(|f| f.as_array()) {
            if !failures.is_empty() {
                return Err(ForgeError::Registry(format!(
                    "batch-delete-image reported {} failure(s) for {}: {}",
                    failures.len(),
                    image.uri(),
                    serde_json::to_string(failures)?,
                )));
            }
        }

        debug!(image = %image.uri(), "deleted image");
        Ok(())
    }
}
