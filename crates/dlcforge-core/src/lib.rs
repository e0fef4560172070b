//! dlcforge core - domain model for the container build-and-test orchestrator.
//!
//! Provides the immutable [`BuildContext`], deterministic [`ImageTag`]
//! composition, [`ChangeSet`] predicates, and the error taxonomy shared by
//! the pipeline and CLI crates.

pub mod changeset;
pub mod context;
pub mod error;
pub mod fakes;
pub mod git;
pub mod identity;
pub mod tag;
pub mod telemetry;

pub use changeset::{ChangeSet, PathPattern};
pub use context::{BuildContext, EnvSnapshot};
pub use error::{ForgeError, Result};
pub use git::{capture_head_sha, changed_files, is_git_repo};
pub use identity::{CallerIdentity, StsCliIdentity};
pub use tag::{sanitize_component, ImageSpec, ImageTag, Processor};
pub use telemetry::init_tracing;

/// dlcforge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
