//! Image tag and registry-coordinate construction.
//!
//! Tags are composed, never concatenated ad hoc: [`ImageTag::compose`] is the
//! single place the `{framework_version}-dlc-{processor}-{build_id}` shape is
//! produced, and every constructor validates the registry tag charset.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::BuildContext;
use crate::error::{ForgeError, Result};

/// Maximum tag length accepted by the registry.
const MAX_TAG_LEN: usize = 128;

/// Target processor architecture for an image build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Processor {
    Cpu,
    Gpu,
}

impl Processor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Processor::Cpu => "cpu",
            Processor::Gpu => "gpu",
        }
    }

    /// Default instance type the test runner targets for this processor.
    pub fn default_instance_type(&self) -> &'static str {
        match self {
            Processor::Cpu => "ml.c4.xlarge",
            Processor::Gpu => "ml.p2.xlarge",
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Processor {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Processor::Cpu),
            "gpu" => Ok(Processor::Gpu),
            other => Err(ForgeError::InvalidTag {
                tag: other.to_string(),
                reason: "unknown processor (expected cpu or gpu)".to_string(),
            }),
        }
    }
}

/// Validated registry tag.
///
/// Charset is restricted to `[A-Za-z0-9_.-]`; the first character must be
/// alphanumeric or `_`. Uniqueness per CI run comes from the build id
/// component, so concurrent builds never collide in the tag namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTag(String);

impl ImageTag {
    /// Compose the deterministic per-build tag:
    /// `{framework_version}-dlc-{processor}-{build_id}`.
    pub fn compose(framework_version: &str, processor: Processor, build_id: &str) -> Result<Self> {
        let raw = format!(
            "{}-dlc-{}-{}",
            sanitize_component(framework_version),
            processor,
            sanitize_component(build_id),
        );
        Self::parse(&raw)
    }

    /// Validate a raw tag string.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(ForgeError::InvalidTag {
                tag: raw.to_string(),
                reason: "tag must not be empty".to_string(),
            });
        }
        if raw.len() > MAX_TAG_LEN {
            return Err(ForgeError::InvalidTag {
                tag: raw.to_string(),
                reason: format!("tag exceeds {MAX_TAG_LEN} characters"),
            });
        }
        if !raw.chars().all(is_tag_char) {
            return Err(ForgeError::InvalidTag {
                tag: raw.to_string(),
                reason: "tag may only contain [A-Za-z0-9_.-]".to_string(),
            });
        }
        // Registries reject tags starting with a separator.
        if raw.starts_with('.') || raw.starts_with('-') {
            return Err(ForgeError::InvalidTag {
                tag: raw.to_string(),
                reason: "tag must not start with '.' or '-'".to_string(),
            });
        }
        Ok(ImageTag(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// Map characters the registry rejects to `-`.
///
/// CI build ids arrive as `project:uuid`; the `:` must not leak into the tag.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if is_tag_char(c) { c } else { '-' })
        .collect()
}

/// Full registry coordinates of one pushed image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSpec {
    pub account_id: String,
    pub region: String,
    pub repository: String,
    pub tag: ImageTag,
}

impl ImageSpec {
    /// Coordinates for a tag within the context's account/region/repo.
    pub fn new(ctx: &BuildContext, tag: ImageTag) -> Self {
        Self {
            account_id: ctx.account_id.clone(),
            region: ctx.region.clone(),
            repository: ctx.ecr_repo.clone(),
            tag,
        }
    }

    /// Registry hostname, e.g. `123456789012.dkr.ecr.us-west-2.amazonaws.com`.
    pub fn registry_host(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account_id, self.region)
    }

    /// Fully-qualified image URI used for push, pull, and test injection.
    pub fn uri(&self) -> String {
        format!("{}/{}:{}", self.registry_host(), self.repository, self.tag)
    }
}
