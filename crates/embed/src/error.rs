use thiserror::Error;

/// Errors surfaced by an [`EmbeddingProvider`](crate::EmbeddingProvider).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbedError {
    /// Configuration is inconsistent (e.g. Vertex mode without a project).
    #[error("invalid embedding config: {0}")]
    InvalidConfig(String),
    /// The provider could not be reached at all.
    #[error("embedding provider unreachable: {0}")]
    Unreachable(String),
    /// The provider answered with a non-success status.
    #[error("embedding provider returned {status}: {body}")]
    Upstream { status: u16, body: String },
    /// The provider answered, but not with a usable embedding.
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),
    /// The request payload is not an image the provider can use.
    #[error("invalid image: {0}")]
    InvalidImage(String),
    /// The provider did not answer within the configured timeout.
    #[error("embedding provider timed out after {0}s")]
    Timeout(u64),
}

impl EmbedError {
    /// Whether the failure is on the provider side rather than the caller's.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            EmbedError::Unreachable(_)
                | EmbedError::Upstream { .. }
                | EmbedError::MalformedResponse(_)
                | EmbedError::Timeout(_)
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            EmbedError::Timeout(timeout_secs)
        } else if err.is_decode() {
            EmbedError::MalformedResponse(err.to_string())
        } else {
            EmbedError::Unreachable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_upstream_display() {
        let err = EmbedError::Upstream {
            status: 429,
            body: "quota exceeded".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("quota exceeded"));
        assert!(err.is_upstream());
    }

    #[test]
    fn caller_errors_are_not_upstream() {
        assert!(!EmbedError::InvalidImage("empty".into()).is_upstream());
        assert!(!EmbedError::InvalidConfig("no project".into()).is_upstream());
        assert!(EmbedError::Timeout(30).is_upstream());
    }

    #[test]
    fn error_timeout_mentions_seconds() {
        assert!(EmbedError::Timeout(12).to_string().contains("12s"));
    }
}
