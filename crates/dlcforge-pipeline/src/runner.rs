//! Conditional invocation execution.

use std::process::Stdio;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use dlcforge_core::{BuildContext, ChangeSet, ForgeError, ImageSpec, Result};

use crate::invocation::TestInvocation;

/// Terminal state of one invocation.
///
/// Lifecycle: pending -> {skipped | running -> {succeeded | failed}}.
/// Only terminal states are observable in results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Skipped,
    Succeeded,
    Failed,
}

/// Result of evaluating and (possibly) executing one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Invocation name.
    pub name: String,

    /// Terminal status.
    pub status: InvocationStatus,

    /// Exit code when the subprocess ran and exited; `None` for skips,
    /// spawn failures, and timeouts.
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr (or the spawn/timeout error text).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl InvocationResult {
    /// Whether this invocation counts toward a passing build.
    pub fn passed(&self) -> bool {
        self.status != InvocationStatus::Failed
    }

    pub fn skipped(&self) -> bool {
        self.status == InvocationStatus::Skipped
    }

    fn skip(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: InvocationStatus::Skipped,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }
}

/// Executes invocations gated on the change set.
pub struct InvocationRunner;

impl InvocationRunner {
    /// Run the invocation iff its path patterns match the change set.
    ///
    /// When unmatched, returns `Skipped` without spawning anything. When
    /// matched, the command runs with the build context exported into its
    /// environment (`DLC_*` variables, plus `DLC_IMAGE_URI` and
    /// `DLC_INSTANCE_TYPE` when present).
    ///
    /// Runtime failures (non-zero exit, spawn error, timeout) are reported
    /// as `Failed` results rather than errors, so a failing invocation never
    /// aborts its siblings. `Err` is reserved for configuration problems.
    pub async fn run_if_changed(
        invocation: &TestInvocation,
        changes: &ChangeSet,
        ctx: &BuildContext,
        image: Option<&ImageSpec>,
    ) -> Result<InvocationResult> {
        let patterns = invocation.patterns()?;

        if !changes.matches_any(&patterns) {
            info!(invocation = %invocation.name, "no matching changes, skipping");
            return Ok(InvocationResult::skip(&invocation.name));
        }

        if invocation.command.is_empty() {
            return Err(ForgeError::Invocation(format!(
                "invocation {} has empty command",
                invocation.name
            )));
        }

        let start = Instant::now();
        let exe = &invocation.command[0];
        let args = &invocation.command[1..];

        let mut command = Command::new(exe);
        command
            .args(args)
            .envs(ctx.export_env())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(image) = image {
            command.env("DLC_IMAGE_URI", image.uri());
        }
        if let Some(instance_type) = &invocation.instance_type {
            command.env("DLC_INSTANCE_TYPE", instance_type);
        }

        info!(invocation = %invocation.name, command = ?invocation.command, "executing");

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(invocation = %invocation.name, error = %e, "spawn failed");
                return Ok(Self::runtime_failure(
                    invocation,
                    format!("failed to spawn {exe}: {e}"),
                    start,
                ));
            }
        };

        let output = if invocation.timeout_secs > 0 {
            match tokio::time::timeout(
                std::time::Duration::from_secs(invocation.timeout_secs),
                child.wait_with_output(),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(invocation = %invocation.name, "timed out");
                    return Ok(Self::runtime_failure(
                        invocation,
                        format!("timed out after {} seconds", invocation.timeout_secs),
                        start,
                    ));
                }
            }
        } else {
            child.wait_with_output().await
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return Ok(Self::runtime_failure(
                    invocation,
                    format!("failed to collect output: {e}"),
                    start,
                ));
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code();
        let status = if output.status.success() {
            InvocationStatus::Succeeded
        } else {
            InvocationStatus::Failed
        };

        Ok(InvocationResult {
            name: invocation.name.clone(),
            status,
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }

    fn runtime_failure(
        invocation: &TestInvocation,
        message: String,
        start: Instant,
    ) -> InvocationResult {
        InvocationResult {
            name: invocation.name.clone(),
            status: InvocationStatus::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlcforge_core::{ImageTag, Processor};

    fn context() -> BuildContext {
        BuildContext {
            account_id: "123456789012".to_string(),
            region: "us-west-2".to_string(),
            build_id: "b1".to_string(),
            pr_number: Some(7),
            framework_version: "2.3.1".to_string(),
            ecr_repo: "sagemaker-test".to_string(),
        }
    }

    fn invocation(command: Vec<&str>, paths: Vec<&str>) -> TestInvocation {
        TestInvocation::custom(
            "test_invocation",
            command.iter().map(ToString::to_string).collect(),
            paths.iter().map(ToString::to_string).collect(),
            30,
        )
    }

    #[test]
    fn test_result_passed() {
        let result = InvocationResult {
            name: "x".to_string(),
            status: InvocationStatus::Succeeded,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        };
        assert!(result.passed());
        assert!(!result.skipped());

        let result = InvocationResult::skip("x");
        assert!(result.passed());
        assert!(result.skipped());
    }

    #[tokio::test]
    async fn test_skipped_when_no_match() {
        let changes = ChangeSet::new(["README.md"]);
        let inv = invocation(vec!["echo", "hello"], vec!["test/", "src/*.py"]);

        let result = InvocationRunner::run_if_changed(&inv, &changes, &context(), None)
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Skipped);
        assert!(result.exit_code.is_none());
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_skipped_leaves_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let changes = ChangeSet::new(["README.md"]);
        let inv = invocation(
            vec!["touch", marker.to_str().unwrap()],
            vec!["test/"],
        );

        let result = InvocationRunner::run_if_changed(&inv, &changes, &context(), None)
            .await
            .unwrap();

        assert!(result.skipped());
        assert!(!marker.exists(), "skipped invocation must not execute");
    }

    #[tokio::test]
    async fn test_matched_invocation_executes() {
        let changes = ChangeSet::new(["test/integration/foo.py"]);
        let inv = invocation(vec!["echo", "hello"], vec!["test/"]);

        let result = InvocationRunner::run_if_changed(&inv, &changes, &context(), None)
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Succeeded);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_failing_invocation_reports_exit_code() {
        let changes = ChangeSet::new(["src/a.py"]);
        let inv = invocation(vec!["sh", "-c", "exit 3"], vec!["src/"]);

        let result = InvocationRunner::run_if_changed(&inv, &changes, &context(), None)
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_context_injected_into_environment() {
        let changes = ChangeSet::new(["src/a.py"]);
        let inv = invocation(
            vec!["sh", "-c", "echo $DLC_BUILD_ID $DLC_PR_NUMBER $DLC_IMAGE_URI"],
            vec!["src/"],
        );
        let ctx = context();
        let image = ImageSpec::new(
            &ctx,
            ImageTag::compose("2.3.1", Processor::Cpu, "b1").unwrap(),
        );

        let result = InvocationRunner::run_if_changed(&inv, &changes, &ctx, Some(&image))
            .await
            .unwrap();

        assert!(result.stdout.contains("b1"));
        assert!(result.stdout.contains('7'));
        assert!(result.stdout.contains("sagemaker-test:2.3.1-dlc-cpu-b1"));
    }

    #[tokio::test]
    async fn test_instance_type_exported() {
        let changes = ChangeSet::new(["src/a.py"]);
        let mut inv = invocation(vec!["sh", "-c", "echo $DLC_INSTANCE_TYPE"], vec!["src/"]);
        inv.instance_type = Some("ml.p2.xlarge".to_string());

        let result = InvocationRunner::run_if_changed(&inv, &changes, &context(), None)
            .await
            .unwrap();

        assert!(result.stdout.contains("ml.p2.xlarge"));
    }

    #[tokio::test]
    async fn test_spawn_failure_reported_as_failed() {
        let changes = ChangeSet::new(["src/a.py"]);
        let inv = invocation(
            vec!["/nonexistent-binary-that-does-not-exist"],
            vec!["src/"],
        );

        let result = InvocationRunner::run_if_changed(&inv, &changes, &context(), None)
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Failed);
        assert!(result.exit_code.is_none());
        assert!(result.stderr.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_timeout_reported_as_failed() {
        let changes = ChangeSet::new(["src/a.py"]);
        let mut inv = invocation(vec!["sleep", "5"], vec!["src/"]);
        inv.timeout_secs = 1;

        let result = InvocationRunner::run_if_changed(&inv, &changes, &context(), None)
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Failed);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_command_is_config_error() {
        let changes = ChangeSet::new(["src/a.py"]);
        let inv = invocation(vec![], vec!["src/"]);

        let err = InvocationRunner::run_if_changed(&inv, &changes, &context(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Invocation(_)));
    }
}
