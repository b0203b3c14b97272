/// Convenience result type used across the compositor.
pub type CompositorResult<T> = Result<T, CompositorError>;

/// Top-level error taxonomy used by the fallible compositor surfaces.
///
/// Graph evaluation itself never fails: missing group trees, nodes that fail their validity
/// check, and oversized fusion units all degrade to invalid results. Errors are reserved for
/// loading and validating node trees and for host-side plumbing.
#[derive(thiserror::Error, Debug)]
pub enum CompositorError {
    /// Invalid user-provided node tree or document data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors raised while preparing or reading back an evaluation.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Errors when serializing or deserializing documents.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CompositorError {
    /// Build a [`CompositorError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`CompositorError::Evaluation`] value.
    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    /// Build a [`CompositorError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
