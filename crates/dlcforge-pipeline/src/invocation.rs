//! Test invocation definitions and configuration.

use serde::{Deserialize, Serialize};

use dlcforge_core::changeset::PathPattern;
use dlcforge_core::{Processor, Result};

fn default_timeout() -> u64 {
    3600
}

/// Builtin test suites of the training-toolkit repository.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinSuite {
    /// Unit tests; no image required.
    UnitTest,

    /// Integration tests against a locally pulled image.
    LocalIntegration,

    /// Integration tests launched through the hosted training service.
    SageMakerIntegration,
}

impl BuiltinSuite {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinSuite::UnitTest => "unit_test",
            BuiltinSuite::LocalIntegration => "local_integration",
            BuiltinSuite::SageMakerIntegration => "sagemaker_integration",
        }
    }

    /// Test-runner command for this suite (first element is the executable).
    ///
    /// Flaky-suite rerun counts ride along as plan data; retry policy lives
    /// in the test runner, not in the orchestrator.
    pub fn command(&self, processor: Processor) -> Vec<String> {
        match self {
            BuiltinSuite::UnitTest => ["python", "-m", "pytest", "test/unit"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            BuiltinSuite::LocalIntegration => [
                "python",
                "-m",
                "pytest",
                "test/integration/local",
                "--processor",
                processor.as_str(),
                "--reruns",
                "2",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            BuiltinSuite::SageMakerIntegration => [
                "python",
                "-m",
                "pytest",
                "test/integration/sagemaker",
                "--processor",
                processor.as_str(),
                "--reruns",
                "2",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }

    /// Path patterns that gate this suite against the change set.
    pub fn required_paths(&self) -> Vec<String> {
        let paths: &[&str] = match self {
            BuiltinSuite::UnitTest => &["src/", "test/unit/", "setup.py"],
            BuiltinSuite::LocalIntegration | BuiltinSuite::SageMakerIntegration => {
                &["src/", "test/", "docker/", "buildspec*.yml", "setup.py"]
            }
        };
        paths.iter().map(ToString::to_string).collect()
    }

    pub fn timeout_secs(&self) -> u64 {
        match self {
            BuiltinSuite::UnitTest => 900,
            BuiltinSuite::LocalIntegration => 3600,
            BuiltinSuite::SageMakerIntegration => 7200,
        }
    }

    /// Whether the suite runs against the hosted service and therefore
    /// targets a managed instance type.
    fn needs_instance_type(&self) -> bool {
        matches!(self, BuiltinSuite::SageMakerIntegration)
    }
}

/// One conditional test command.
///
/// Constructed from static configuration (builtin suites or a JSON plan),
/// evaluated once against the change set, then executed or skipped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestInvocation {
    /// Human-readable invocation name.
    pub name: String,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// OR-combined path patterns; the invocation runs only when the change
    /// set matches at least one.
    pub required_paths: Vec<String>,

    /// Managed instance type for hosted suites, exported to the runner.
    #[serde(default)]
    pub instance_type: Option<String>,

    /// Timeout in seconds (0 = unlimited).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl TestInvocation {
    /// Create an invocation from a builtin suite for one processor track.
    pub fn from_builtin(suite: BuiltinSuite, processor: Processor) -> Self {
        Self {
            name: format!("{}_{}", suite.name(), processor),
            command: suite.command(processor),
            required_paths: suite.required_paths(),
            instance_type: suite
                .needs_instance_type()
                .then(|| processor.default_instance_type().to_string()),
            timeout_secs: suite.timeout_secs(),
        }
    }

    /// Create a custom invocation.
    pub fn custom(
        name: impl Into<String>,
        command: Vec<String>,
        required_paths: Vec<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            required_paths,
            instance_type: None,
            timeout_secs,
        }
    }

    /// Parse the configured path patterns.
    pub fn patterns(&self) -> Result<Vec<PathPattern>> {
        PathPattern::parse_all(&self.required_paths)
    }
}
