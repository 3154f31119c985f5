//! Error types for the snapcycle operator
//!
//! Errors carry enough context to be useful in controller logs: the
//! annotation key and raw value for configuration errors, the underlying
//! kube error for API failures.

use thiserror::Error;

/// Main error type for snapcycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A schedule annotation did not parse as a duration
    #[error("invalid {key} annotation {value:?}: {message}")]
    Annotation {
        /// The annotation key that failed to parse
        key: String,
        /// The raw annotation value
        value: String,
        /// Description of what's invalid
        message: String,
    },

    /// Malformed admission review payload
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "scheduler", "webhook")
        context: String,
    },
}

impl Error {
    /// Create an annotation error for the given key and raw value
    pub fn annotation(
        key: impl Into<String>,
        value: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Annotation {
            key: key.into(),
            value: value.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-review error with the given message
    pub fn invalid_review(msg: impl Into<String>) -> Self {
        Self::InvalidReview(msg.into())
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Annotation and review errors are not retryable (require a config or
    /// caller fix). Kubernetes errors are retryable except for 4xx API
    /// responses (validation, not found, conflict with our own spec).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Annotation { .. } => false,
            Error::InvalidReview(_) => false,
            Error::Internal { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a malformed schedule annotation surfaces the key and value
    ///
    /// When a user sets `snapshot-frequency: "every day"` the reconciler
    /// must log exactly which annotation on which value was rejected, and
    /// must not retry (the user has to fix the annotation).
    #[test]
    fn story_annotation_errors_carry_context() {
        let err = Error::annotation(
            crate::FREQUENCY_ANNOTATION,
            "every day",
            "expected a duration like \"24h\"",
        );
        let rendered = err.to_string();
        assert!(rendered.contains("snapcycle.dev/snapshot-frequency"));
        assert!(rendered.contains("every day"));
        assert!(!err.is_retryable());

        match err {
            Error::Annotation { key, value, .. } => {
                assert_eq!(key, crate::FREQUENCY_ANNOTATION);
                assert_eq!(value, "every day");
            }
            _ => panic!("expected Annotation variant"),
        }
    }

    #[test]
    fn test_invalid_review_not_retryable() {
        let err = Error::invalid_review("unexpected end of input");
        assert!(err.to_string().contains("invalid admission review"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_error_is_retryable() {
        let err = Error::internal("scheduler", "timer state out of sync");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[scheduler]"));
        assert!(err.to_string().contains("timer state out of sync"));
    }

    #[test]
    fn test_error_construction_ergonomics() {
        // From a formatted String
        let volume = "default/data";
        let err = Error::internal("registry", format!("no entry for {}", volume));
        assert!(err.to_string().contains("default/data"));

        // From a &str literal
        let err = Error::annotation("k", "v", "static message");
        assert!(err.to_string().contains("static message"));
    }
}
