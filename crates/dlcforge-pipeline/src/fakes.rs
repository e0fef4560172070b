//! In-memory fakes for pipeline service traits (testing only)
//!
//! Provides `MemoryRegistry` and `RecordingBuilder` that satisfy the trait
//! contracts without docker or AWS access, while recording every call so
//! tests can assert cleanup and build behavior.

use std::sync::Mutex;

use async_trait::async_trait;

use dlcforge_core::{ForgeError, ImageSpec, Result};

use crate::builder::{BuildOptions, ImageBuilder};
use crate::registry::ImageRegistry;

/// In-memory registry that records delete calls.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    deletes: Mutex<Vec<String>>,
    fail: bool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose deletes always fail, for exercising cleanup
    /// suppression. Calls are still recorded.
    pub fn failing() -> Self {
        Self {
            deletes: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// URIs passed to `delete_image`, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageRegistry for MemoryRegistry {
    async fn delete_image(&self, image: &ImageSpec) -> Result<()> {
        self.deletes.lock().unwrap().push(image.uri());
        if self.fail {
            return Err(ForgeError::Registry(
                "simulated registry outage".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder that records build requests instead of invoking docker.
#[derive(Debug, Default)]
pub struct RecordingBuilder {
    builds: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose builds always fail.
    pub fn failing() -> Self {
        Self {
            builds: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// URIs passed to `build_and_push`, in call order.
    pub fn built(&self) -> Vec<String> {
        self.builds.lock().unwrap().clone()
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageBuilder for RecordingBuilder {
    async fn build_and_push(&self, _options: &BuildOptions, image: &ImageSpec) -> Result<()> {
        self.builds.lock().unwrap().push(image.uri());
        if self.fail {
            return Err(ForgeError::ImageBuild(
                "simulated build failure".to_string(),
            ));
        }
        Ok(())
    }
}
