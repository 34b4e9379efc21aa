//! Error types for the Open5GS operator
//!
//! Errors carry enough structure for the reconcile loops to decide between
//! "skip quietly", "log and wait for the next pass", and "surface in status".

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Open5GS operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Subscriber datastore error
    #[error("datastore error [{endpoint}]: {message}")]
    Datastore {
        /// Address of the datastore that failed
        endpoint: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Invalid user input on a declared resource
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.imsi")
        field: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "engine", "compiler")
        context: String,
    },
}

impl Error {
    /// Create a datastore error for the given endpoint
    pub fn datastore(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Datastore {
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status of the underlying API error, if any
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// The object (or kind) does not exist
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// The object changed since it was read
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// The operator's identity may not perform this call
    pub fn is_forbidden(&self) -> bool {
        self.api_code() == Some(403)
    }

    /// Check if this error is worth retrying on the next pass
    ///
    /// Conflicts and transport failures are transient. Other 4xx responses,
    /// invalid input and serialization bugs need a human.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 409 || ae.code == 429 || ae.code >= 500,
                _ => true,
            },
            Error::Datastore { .. } => true,
            Error::Serialization { .. } => false,
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Datastore { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} for test"),
            reason: reason.to_string(),
            code,
        }))
    }

    // ==========================================================================
    // Story Tests: how reconcile loops classify failures
    // ==========================================================================

    /// Story: a missing object is a normal lookup outcome, not a failure
    #[test]
    fn story_not_found_is_distinguishable() {
        let err = api_error(404, "NotFound");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert!(!err.is_retryable());
    }

    /// Story: a concurrent writer bumps the resource version
    ///
    /// The pass gives up on that resource and the next pass re-reads it.
    #[test]
    fn story_version_conflict_is_transient() {
        let err = api_error(409, "Conflict");
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    /// Story: missing RBAC is surfaced but not hammered
    #[test]
    fn story_forbidden_waits_for_next_schedule() {
        let err = api_error(403, "Forbidden");
        assert!(err.is_forbidden());
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(api_error(500, "InternalError").is_retryable());
        assert!(api_error(429, "TooManyRequests").is_retryable());
    }

    #[test]
    fn datastore_error_keeps_endpoint() {
        let err = Error::datastore("mongodb://10.0.0.7:27017", "connection refused");
        assert!(err.to_string().contains("10.0.0.7"));
        assert_eq!(err.context(), Some("mongodb://10.0.0.7:27017"));
        assert!(err.is_retryable());
        assert_eq!(err.api_code(), None);
    }

    #[test]
    fn validation_and_serialization_are_permanent() {
        assert!(!Error::validation("bad imsi").is_retryable());
        assert!(!Error::serialization_for_kind("ConfigMap", "bad yaml").is_retryable());
        match Error::validation_for_field("spec.imsi", "too long") {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("spec.imsi")),
            other => panic!("expected Validation variant, got {other:?}"),
        }
    }

    #[test]
    fn internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));

        let err = Error::internal_with_context("engine", "missing name");
        assert!(err.to_string().contains("[engine]"));
    }
}
