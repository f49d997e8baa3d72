//! Controller-specific error types.
//!
//! This module defines error types specific to the Server Controller
//! that are not covered by upstream library errors.

use thiserror::Error;
use kube::Error as KubeError;

/// Errors that can occur in the Server Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Controller owner reference could not be built for a Server
    #[error("Failed to build owner reference for Server {0}")]
    OwnerReference(String),

    /// Object is missing a metadata key the controller depends on
    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Pod ownership index did not finish its initial listing
    #[error("Pod ownership index not synced: {0}")]
    IndexNotSynced(String),
}
