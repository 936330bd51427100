//! Controller-specific error types.
//!
//! This module defines error types specific to the chart controller
//! that are not covered by upstream library errors.

use thiserror::Error;

use kube::Error as KubeError;

use crate::apply::ApplyError;

/// Errors that can occur in the chart controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Apply pass failed to converge
    #[error("apply failed: {0}")]
    Apply(#[from] ApplyError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
