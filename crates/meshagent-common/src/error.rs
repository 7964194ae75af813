//! Error types for mesh-agent
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant maps onto one failure class the reconcilers care about:
//! configuration errors are permanent, store and transport errors are
//! transient, conflicts and expected rejections are retried by the caller.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Substring the API server uses when a prerequisite mesh type is not configured yet
pub const NOT_CONFIGURED_MARKER: &str = "unconfigured";

/// Main error type for mesh-agent operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid rollout configuration
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Resource (service or route) with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "services[0].ratio")
        field: Option<String>,
    },

    /// Object store failure that is not a Kubernetes API error
    #[error("store error [{kind}]: {message}")]
    Store {
        /// Object kind involved
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// Stale resource version on update
    #[error("conflict updating {kind} {namespace}/{name}: {message}")]
    Conflict {
        /// Object kind
        kind: String,
        /// Object namespace (empty for cluster-scoped objects)
        namespace: String,
        /// Object name
        name: String,
        /// Server message
        message: String,
    },

    /// Apply rejected because a prerequisite mesh object is not configured yet
    #[error("{kind} {namespace}/{name} rejected, prerequisite not configured: {message}")]
    NotConfigured {
        /// Object kind
        kind: String,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
        /// Server message
        message: String,
    },

    /// A manifest document could not be decoded
    #[error("decode error in document {document}: {message}")]
    Decode {
        /// Zero-based index of the offending document
        document: usize,
        /// Description of what failed
        message: String,
    },

    /// Request/response transport failure (manifest source, webhooks)
    #[error("transport error [{endpoint}]: {message}")]
    Transport {
        /// Endpoint that was called
        endpoint: String,
        /// Description of what failed
        message: String,
    },

    /// Notification sink failure
    #[error("notification error: {message}")]
    Notification {
        /// Description of what failed
        message: String,
    },

    /// The caller cancelled the pass between external calls
    #[error("cancelled during {stage}")]
    Cancelled {
        /// Step that was about to run
        stage: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific resource and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a store error
    pub fn store(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Store {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create an expected-rejection error
    pub fn not_configured(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::NotConfigured {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a decode error for the given document index
    pub fn decode(document: usize, msg: impl Into<String>) -> Self {
        Self::Decode {
            document,
            message: msg.into(),
        }
    }

    /// Create a transport error
    pub fn transport(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Create a notification error
    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification {
            message: msg.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
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

    /// Check if this error is retryable
    ///
    /// Validation, decode and serialization errors need a configuration fix.
    /// Everything else is handed back to the external retry mechanism.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 409 || ae.code == 429 || ae.code >= 500,
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Store { .. } => true,
            Error::Conflict { .. } => true,
            Error::NotConfigured { .. } => true,
            Error::Decode { .. } => false,
            Error::Transport { .. } => true,
            Error::Notification { .. } => true,
            Error::Cancelled { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this is an expected rejection that should not be alerted on
    pub fn is_expected_rejection(&self) -> bool {
        matches!(self, Error::NotConfigured { .. })
    }

    /// Whether this is a configuration error (fails before any write)
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Whether the message of this error carries the "not configured" marker
    pub fn mentions_not_configured(&self) -> bool {
        self.to_string().contains(NOT_CONFIGURED_MARKER)
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Cancelled { stage } => Some(stage),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
