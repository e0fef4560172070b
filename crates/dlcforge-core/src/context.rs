//! Build-context resolution.
//!
//! The orchestrator never reads mutable process environment mid-run: an
//! [`EnvSnapshot`] is taken once, the context is resolved from it, and the
//! resulting [`BuildContext`] is immutable for the remainder of the build.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::identity::CallerIdentity;
use crate::tag::sanitize_component;

/// Environment variable carrying the AWS region.
pub const ENV_REGION: &str = "AWS_DEFAULT_REGION";
/// Fallback region variable used by newer SDKs.
pub const ENV_REGION_ALT: &str = "AWS_REGION";
/// CI build identifier (unique per run).
pub const ENV_BUILD_ID: &str = "CODEBUILD_BUILD_ID";
/// CI source version, e.g. `pr/412` for pull-request builds.
pub const ENV_SOURCE_VERSION: &str = "CODEBUILD_SOURCE_VERSION";
/// Framework version override.
pub const ENV_FRAMEWORK_VERSION: &str = "FRAMEWORK_VERSION";
/// Target ECR repository name.
pub const ENV_ECR_REPO: &str = "ECR_REPO";

/// Repository used for transient test images when `ECR_REPO` is not set.
const DEFAULT_ECR_REPO: &str = "sagemaker-test";

/// Immutable snapshot of the process environment taken at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot(BTreeMap<String, String>);

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    /// Empty snapshot, populated via [`EnvSnapshot::with`] in tests.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Resolved identity and configuration for one CI run.
///
/// Immutable once resolved; operations receive it by reference and export it
/// into subprocess environments via [`BuildContext::export_env`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildContext {
    /// Account owning the test registry, from the identity service.
    pub account_id: String,
    pub region: String,
    /// Sanitized CI build id; unique per run, safe for tag composition.
    pub build_id: String,
    /// Pull-request number when the source version carries one.
    pub pr_number: Option<u64>,
    pub framework_version: String,
    pub ecr_repo: String,
}

impl BuildContext {
    /// Resolve a context from the environment snapshot and identity service.
    ///
    /// Fatal on missing region, unresolvable framework version, or identity
    /// failure: no test runs without a complete context.
    pub async fn resolve(
        env: &EnvSnapshot,
        identity: &dyn CallerIdentity,
        workspace: &Path,
    ) -> Result<Self> {
        let region = env
            .get(ENV_REGION)
            .or_else(|| env.get(ENV_REGION_ALT))
            .ok_or_else(|| {
                ForgeError::ContextResolution(format!(
                    "missing AWS region ({ENV_REGION} or {ENV_REGION_ALT})"
                ))
            })?
            .to_string();

        let build_id = match env.get(ENV_BUILD_ID) {
            Some(raw) => sanitize_component(raw),
            // Local runs outside CI still need a unique tag component.
            None => uuid::Uuid::new_v4().to_string(),
        };

        let pr_number = env.get(ENV_SOURCE_VERSION).and_then(extract_pr_number);

        let framework_version = match env.get(ENV_FRAMEWORK_VERSION) {
            Some(v) => v.to_string(),
            None => read_version_file(workspace)?,
        };

        let ecr_repo = env
            .get(ENV_ECR_REPO)
            .unwrap_or(DEFAULT_ECR_REPO)
            .to_string();

        let account_id = identity
            .account_id()
            .await
            .map_err(|e| ForgeError::ContextResolution(e.to_string()))?;

        debug!(
            region = %region,
            build_id = %build_id,
            pr_number = ?pr_number,
            "resolved build context"
        );

        Ok(Self {
            account_id,
            region,
            build_id,
            pr_number,
            framework_version,
            ecr_repo,
        })
    }

    /// Environment pairs injected into every test subprocess.
    pub fn export_env(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("DLC_ACCOUNT_ID".to_string(), self.account_id.clone()),
            ("DLC_REGION".to_string(), self.region.clone()),
            ("DLC_BUILD_ID".to_string(), self.build_id.clone()),
            (
                "DLC_FRAMEWORK_VERSION".to_string(),
                self.framework_version.clone(),
            ),
            ("DLC_ECR_REPO".to_string(), self.ecr_repo.clone()),
        ];
        if let Some(pr) = self.pr_number {
            vars.push(("DLC_PR_NUMBER".to_string(), pr.to_string()));
        }
        vars
    }
}

/// Extract the pull-request number as the first run of digits in the CI
/// source version (`pr/412` -> 412, `refs/pull/88/head` -> 88).
fn extract_pr_number(source_version: &str) -> Option<u64> {
    // The pattern is a literal; unwrap cannot fire.
    let digits = Regex::new(r"\d+").unwrap();
    digits
        .find(source_version)
        .and_then(|m| m.as_str().parse().ok())
}

/// Read the framework version from the workspace `VERSION` file.
fn read_version_file(workspace: &Path) -> Result<String> {
    let path = workspace.join("VERSION");
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        ForgeError::ContextResolution(format!(
            "framework version not set ({ENV_FRAMEWORK_VERSION}) and {path:?} unreadable: {e}"
        ))
    })?;
    let version = raw.trim().to_string();
    if version.is_empty() {
        return Err(ForgeError::ContextResolution(format!(
            "{path:?} is empty"
        )));
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FailingIdentity, StaticIdentity};

    fn full_env() -> EnvSnapshot {
        EnvSnapshot::empty()
            .with(ENV_REGION, "us-west-2")
            .with(ENV_BUILD_ID, "toolkit:4f2d9c1a")
            .with(ENV_SOURCE_VERSION, "pr/412")
            .with(ENV_FRAMEWORK_VERSION, "2.3.1")
    }

    #[tokio::test]
    async fn test_resolve_full_environment() {
        let identity = StaticIdentity::new("123456789012");
        let ctx = BuildContext::resolve(&full_env(), &identity, Path::new("."))
            .await
            .unwrap();

        assert_eq!(ctx.account_id, "123456789012");
        assert_eq!(ctx.region, "us-west-2");
        assert_eq!(ctx.build_id, "toolkit-4f2d9c1a");
        assert_eq!(ctx.pr_number, Some(412));
        assert_eq!(ctx.framework_version, "2.3.1");
        assert_eq!(ctx.ecr_repo, "sagemaker-test");
    }

    #[tokio::test]
    async fn test_resolve_missing_region_is_fatal() {
        let env = EnvSnapshot::empty().with(ENV_FRAMEWORK_VERSION, "2.3.1");
        let identity = StaticIdentity::new("123456789012");
        let err = BuildContext::resolve(&env, &identity, Path::new("."))
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::ContextResolution(_)));
        assert!(err.to_string().contains("region"));
    }

    #[tokio::test]
    async fn test_resolve_identity_failure_is_fatal() {
        let err = BuildContext::resolve(&full_env(), &FailingIdentity, Path::new("."))
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::ContextResolution(_)));
    }

    #[tokio::test]
    async fn test_resolve_generates_local_build_id() {
        let env = EnvSnapshot::empty()
            .with(ENV_REGION, "us-west-2")
            .with(ENV_FRAMEWORK_VERSION, "2.3.1");
        let identity = StaticIdentity::new("123456789012");

        let a = BuildContext::resolve(&env, &identity, Path::new("."))
            .await
            .unwrap();
        let b = BuildContext::resolve(&env, &identity, Path::new("."))
            .await
            .unwrap();

        assert!(!a.build_id.is_empty());
        // Generated ids must stay unique across invocations.
        assert_ne!(a.build_id, b.build_id);
    }

    #[tokio::test]
    async fn test_resolve_reads_version_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("VERSION"), "2.4.0\n").unwrap();

        let env = EnvSnapshot::empty().with(ENV_REGION, "us-east-1");
        let identity = StaticIdentity::new("123456789012");
        let ctx = BuildContext::resolve(&env, &identity, dir.path())
            .await
            .unwrap();
        assert_eq!(ctx.framework_version, "2.4.0");
    }

    #[tokio::test]
    async fn test_resolve_missing_version_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvSnapshot::empty().with(ENV_REGION, "us-east-1");
        let identity = StaticIdentity::new("123456789012");
        let err = BuildContext::resolve(&env, &identity, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::ContextResolution(_)));
    }

    #[test]
    fn test_extract_pr_number() {
        assert_eq!(extract_pr_number("pr/412"), Some(412));
        assert_eq!(extract_pr_number("refs/pull/88/head"), Some(88));
        assert_eq!(extract_pr_number("main"), None);
        assert_eq!(extract_pr_number(""), None);
    }

    #[tokio::test]
    async fn test_export_env_pairs() {
        let identity = StaticIdentity::new("123456789012");
        let ctx = BuildContext::resolve(&full_env(), &identity, Path::new("."))
            .await
            .unwrap();

        let env: BTreeMap<_, _> = ctx.export_env().into_iter().collect();
        assert_eq!(env.get("DLC_ACCOUNT_ID").unwrap(), "123456789012");
        assert_eq!(env.get("DLC_PR_NUMBER").unwrap(), "412");
        assert_eq!(env.get("DLC_FRAMEWORK_VERSION").unwrap(), "2.3.1");
    }
}
