//! Domain-level error taxonomy for dlcforge.

/// dlcforge domain errors.
///
/// `ContextResolution` is fatal: nothing runs without a resolved build
/// context. Invocation failures are recorded per invocation and aggregated
/// instead of surfacing through this enum. Registry errors raised during
/// cleanup are suppressed by the cleanup scope and only logged.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("context resolution failed: {0}")]
    ContextResolution(String),

    #[error("identity lookup failed: {0}")]
    Identity(String),

    #[error("invalid image tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("invalid path pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("image build error: {0}")]
    ImageBuild(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("invocation error: {0}")]
    Invocation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for dlcforge domain operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forge_error_display() {
        let err = ForgeError::ContextResolution("missing AWS region".to_string());
        assert!(err.to_string().contains("context resolution failed"));

        let err = ForgeError::Identity("sts unreachable".to_string());
        assert!(err.to_string().contains("identity lookup failed"));

        let err = ForgeError::Registry("batch-delete-image denied".to_string());
        assert!(err.to_string().contains("registry error"));
    }

    #[test]
    fn test_invalid_tag_error() {
        let err = ForgeError::InvalidTag {
            tag: "a/b".to_string(),
            reason: "contains '/'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a/b"));
        assert!(msg.contains("contains '/'"));
    }

    #[test]
    fn test_invalid_pattern_error() {
        let err = ForgeError::InvalidPattern {
            pattern: "test/[".to_string(),
            reason: "unclosed character class".to_string(),
        };
        assert!(err.to_string().contains("test/["));
    }
}
