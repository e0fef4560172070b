//! Track orchestration: build, conditionally test, always clean up.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dlcforge_core::{
    BuildContext, ChangeSet, ForgeError, ImageSpec, ImageTag, Processor, Result,
};

use crate::builder::{BuildOptions, ImageBuilder};
use crate::cleanup::with_cleanup;
use crate::invocation::{BuiltinSuite, TestInvocation};
use crate::registry::ImageRegistry;
use crate::runner::{InvocationResult, InvocationRunner};

/// What to do with the remaining invocations of a track once one fails.
///
/// `ContinueOnFailure` is the default: every suite reports its own result
/// even when an earlier one fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    ContinueOnFailure,
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "continue" | "continue-on-failure" => Ok(FailurePolicy::ContinueOnFailure),
            "fail-fast" => Ok(FailurePolicy::FailFast),
            other => Err(ForgeError::Invocation(format!(
                "unknown failure policy {other:?} (expected continue or fail-fast)"
            ))),
        }
    }
}

/// One processor track: an optional image build plus its invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPlan {
    pub processor: Processor,

    /// Image build options; `None` runs the invocations without building.
    #[serde(default)]
    pub build: Option<BuildOptions>,

    pub invocations: Vec<TestInvocation>,
}

impl TrackPlan {
    /// The builtin suite lineup for one processor.
    pub fn builtin(processor: Processor, build: Option<BuildOptions>) -> Self {
        Self {
            processor,
            build,
            invocations: vec![
                TestInvocation::from_builtin(BuiltinSuite::UnitTest, processor),
                TestInvocation::from_builtin(BuiltinSuite::LocalIntegration, processor),
                TestInvocation::from_builtin(BuiltinSuite::SageMakerIntegration, processor),
            ],
        }
    }
}

/// Result of a complete track execution.
#[derive(Debug, Clone)]
pub struct TrackResult {
    pub processor: Processor,

    /// URI of the transient image the track ran against.
    pub image_uri: String,

    pub started_at: DateTime<Utc>,

    /// Results of individual invocations, in execution order.
    pub invocations: Vec<InvocationResult>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl TrackResult {
    /// A track passes when every invocation succeeded or was skipped.
    pub fn success(&self) -> bool {
        self.invocations.iter().all(InvocationResult::passed)
    }

    /// Process exit code for this track: 0 on success, otherwise the first
    /// failing invocation's code (1 when the subprocess never exited).
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            return 0;
        }
        self.invocations
            .iter()
            .find(|r| !r.passed())
            .and_then(|r| r.exit_code)
            .unwrap_or(1)
    }

    pub fn passed_count(&self) -> usize {
        self.invocations
            .iter()
            .filter(|r| r.passed() && !r.skipped())
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.invocations.iter().filter(|r| r.skipped()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.invocations.iter().filter(|r| !r.passed()).count()
    }
}

/// Change-aware orchestrator for one build context.
///
/// Tracks share nothing mutable: the context is read-only and every track
/// owns a distinct build_id-scoped tag, so concurrent tracks never contend
/// in the registry namespace.
#[derive(Clone)]
pub struct Orchestrator {
    context: BuildContext,
    registry: Arc<dyn ImageRegistry>,
    builder: Option<Arc<dyn ImageBuilder>>,
    policy: FailurePolicy,
    track_deadline: Option<Duration>,
}

impl Orchestrator {
    pub fn new(context: BuildContext, registry: Arc<dyn ImageRegistry>) -> Self {
        Self {
            context,
            registry,
            builder: None,
            policy: FailurePolicy::default(),
            track_deadline: None,
        }
    }

    pub fn with_builder(mut self, builder: Arc<dyn ImageBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound each track so the cleanup finalizer runs before the host CI
    /// system's own timeout kills the process.
    pub fn with_track_deadline(mut self, deadline: Duration) -> Self {
        self.track_deadline = Some(deadline);
        self
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Execute one track: build and push the image (when configured), run
    /// each invocation gated on the change set, and delete the image on
    /// every exit path.
    ///
    /// An image-build failure aborts the track (its tests cannot run); an
    /// invocation failure only aborts the remainder under
    /// [`FailurePolicy::FailFast`].
    pub async fn run_track(&self, plan: &TrackPlan, changes: &ChangeSet) -> Result<TrackResult> {
        let tag = ImageTag::compose(
            &self.context.framework_version,
            plan.processor,
            &self.context.build_id,
        )?;
        let image = ImageSpec::new(&self.context, tag);
        let started_at = Utc::now();
        let start = Instant::now();

        info!(processor = %plan.processor, image = %image.uri(), "starting track");

        let policy = self.policy;
        let invocations = with_cleanup(
            self.registry.as_ref(),
            &image,
            self.track_deadline,
            async {
                if let (Some(builder), Some(options)) = (&self.builder, &plan.build) {
                    builder.build_and_push(options, &image).await?;
                }

                let mut results = Vec::new();
                for invocation in &plan.invocations {
                    let result = InvocationRunner::run_if_changed(
                        invocation,
                        changes,
                        &self.context,
                        Some(&image),
                    )
                    .await?;

                    let failed = !result.passed();
                    results.push(result);

                    if failed && policy == FailurePolicy::FailFast {
                        warn!(
                            invocation = %invocation.name,
                            "invocation failed, aborting remaining invocations"
                        );
                        break;
                    }
                }
                Ok(results)
            },
        )
        .await?;

        let result = TrackResult {
            processor: plan.processor,
            image_uri: image.uri(),
            started_at,
            invocations,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            processor = %plan.processor,
            success = result.success(),
            passed = result.passed_count(),
            skipped = result.skipped_count(),
            failed = result.failed_count(),
            "track finished"
        );

        Ok(result)
    }

    /// Execute independent processor tracks concurrently.
    ///
    /// Each track runs as its own task over the shared read-only context;
    /// results come back in plan order.
    pub async fn run_tracks(
        &self,
        plans: Vec<TrackPlan>,
        changes: &ChangeSet,
    ) -> Result<Vec<TrackResult>> {
        let mut tasks = Vec::new();
        for plan in plans {
            let orchestrator = self.clone();
            let changes = changes.clone();
            tasks.push(tokio::spawn(async move {
                orchestrator.run_track(&plan, &changes).await
            }));
        }

        let mut results = Vec::new();
        for outcome in futures::future::join_all(tasks).await {
            let result = outcome
                .map_err(|e| ForgeError::Invocation(format!("track task failed: {e}")))??;
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::InvocationStatus;

    fn result(status: InvocationStatus, exit_code: Option<i32>) -> InvocationResult {
        InvocationResult {
            name: "x".to_string(),
            status,
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        }
    }

    fn track(invocations: Vec<InvocationResult>) -> TrackResult {
        TrackResult {
            processor: Processor::Cpu,
            image_uri: "host/repo:tag".to_string(),
            started_at: Utc::now(),
            invocations,
            duration_ms: 10,
        }
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!(
            "continue".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::ContinueOnFailure
        );
        assert_eq!(
            "fail-fast".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::FailFast
        );
        assert!("abort".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_track_result_success_with_skips() {
        let result = track(vec![
            result(InvocationStatus::Succeeded, Some(0)),
            result(InvocationStatus::Skipped, None),
        ]);
        assert!(result.success());
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.skipped_count(), 1);
        assert_eq!(result.failed_count(), 0);
    }

    #[test]
    fn test_track_result_exit_code_passthrough() {
        let results = track(vec![
            result(InvocationStatus::Succeeded, Some(0)),
            result(InvocationStatus::Failed, Some(3)),
            result(InvocationStatus::Failed, Some(5)),
        ]);
        assert!(!results.success());
        assert_eq!(results.exit_code(), 3, "first failing code wins");
        assert_eq!(results.failed_count(), 2);
    }

    #[test]
    fn test_track_result_exit_code_fallback() {
        // Spawn failures have no exit code to pass through.
        let results = track(vec![result(InvocationStatus::Failed, None)]);
        assert_eq!(results.exit_code(), 1);
    }

    #[test]
    fn test_builtin_plan_lineup() {
        let plan = TrackPlan::builtin(Processor::Gpu, None);
        assert_eq!(plan.processor, Processor::Gpu);
        assert!(plan.build.is_none());
        assert_eq!(plan.invocations.len(), 3);
        assert_eq!(plan.invocations[0].name, "unit_test_gpu");
        assert_eq!(plan.invocations[2].name, "sagemaker_integration_gpu");
    }

    #[test]
    fn test_track_plan_roundtrips_through_json() {
        let plan = TrackPlan::builtin(
            Processor::Cpu,
            Some(BuildOptions::new("dlc", "training", Processor::Cpu, "2.3.1")),
        );
        let json = serde_json::to_string(&plan).unwrap();
        let back: TrackPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.processor, plan.processor);
        assert_eq!(back.invocations, plan.invocations);
        assert_eq!(back.build, plan.build);
    }
}
