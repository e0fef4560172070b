//! dlcforge pipeline - change-aware build-and-test orchestration.
//!
//! Decides which test invocations to run from the change set, builds and
//! pushes per-track images under deterministic tags, and guarantees registry
//! cleanup on every exit path.

pub mod builder;
pub mod cleanup;
pub mod fakes;
pub mod invocation;
pub mod orchestrator;
pub mod registry;
pub mod runner;

// Re-export key types
pub use builder::{BuildOptions, DockerCliBuilder, ImageBuilder};
pub use cleanup::with_cleanup;
pub use invocation::{BuiltinSuite, TestInvocation};
pub use orchestrator::{FailurePolicy, Orchestrator, TrackPlan, TrackResult};
pub use registry::{EcrCliRegistry, ImageRegistry};
pub use runner::{InvocationResult, InvocationRunner, InvocationStatus};
