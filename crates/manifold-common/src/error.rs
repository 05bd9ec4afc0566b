//! Error types for the manifold operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the resource kind, name or renderer involved so a
//! log line is enough to tell which object in which bundle failed.

use thiserror::Error;

/// Main error type for manifold operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is not one of the absorbed cases below
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The object does not exist on the cluster
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// The object already exists on the cluster
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// No REST mapping is known for a group/version/kind
    #[error("no REST mapping for {gvk}: {message}")]
    NoMatch {
        /// Group/version/kind rendered as `group/version, Kind=kind`
        gvk: String,
        /// Description of what failed
        message: String,
    },

    /// A manifest stream could not be read
    #[error("parse error: {message}")]
    Parse {
        /// Description of what failed
        message: String,
    },

    /// A render backend failed to produce a manifest
    #[error("render error [{renderer}]: {message}")]
    Render {
        /// Backend that failed (helm, kustomize)
        renderer: String,
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

    /// Validation error for Manifest specs
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.install.source")
        field: Option<String>,
    },
}

impl Error {
    /// Create a not-found error for a resource
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for a resource
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a no-match error for an unresolvable group/version/kind
    pub fn no_match(gvk: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NoMatch {
            gvk: gvk.into(),
            message: msg.into(),
        }
    }

    /// Create a parse error with the given message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a render error for a backend
    pub fn render(renderer: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            renderer: renderer.into(),
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

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// True when the object is absent on the cluster
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// True when a create collided with an existing object
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 && ae.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// True when REST mapping resolution found no match
    pub fn is_no_match(&self) -> bool {
        matches!(self, Error::NoMatch { .. })
    }

    /// Check if this error is retryable
    ///
    /// Parse, validation and serialization errors need a spec or content fix.
    /// Everything else may resolve on the next reconciliation pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::NotFound { .. } | Error::AlreadyExists { .. } => true,
            Error::NoMatch { .. } => true,
            Error::Parse { .. } => false,
            Error::Render { .. } => true,
            Error::Serialization { .. } => false,
            Error::Validation { .. } => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Translate a kube-rs error into the absorbed NotFound/AlreadyExists cases.
///
/// Callers above the client seam never inspect HTTP status codes.
pub fn classify_kube_error(err: kube::Error, kind: &str, name: &str) -> Error {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, name),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            Error::already_exists(kind, name)
        }
        _ => Error::Kube { source: err },
    }
}
