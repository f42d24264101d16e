//! Error types for relgat operations.
//!
//! Every failure in the crate is a caller contract violation (bad shapes,
//! inconsistent configuration, malformed files) and is surfaced immediately.
//! Recoverable inconsistencies during checkpoint restore are not errors; they
//! are logged with `tracing::warn!` and summarized in a
//! [`RestoreReport`](crate::checkpoint::RestoreReport).

use thiserror::Error;

/// Main error type for relgat operations.
///
/// # Examples
///
/// ```
/// use relgat::error::RelGatError;
///
/// let err = RelGatError::dimension_mismatch("edge_attr cols", 3, 4);
/// assert!(err.to_string().contains("shape mismatch"));
/// ```
#[derive(Debug, Error)]
pub enum RelGatError {
    /// Tensor rank or dimension contract violated.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected shape description
        expected: String,
        /// Actual shape found
        actual: String,
    },

    /// Configuration cannot produce a consistent model or forward pass
    /// (layer count vs. instruction count, residual width mismatch).
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// An edge endpoint references a node that does not exist.
    #[error("invalid edge index: edge {edge} references node {node}, but only {num_nodes} nodes exist")]
    InvalidEdgeIndex {
        /// Position of the offending edge
        edge: usize,
        /// Offending node index
        node: usize,
        /// Number of nodes available on that side of the edge
        num_nodes: usize,
    },

    /// Invalid hyperparameter value provided.
    #[error("invalid hyperparameter: {param} = {value}, expected {constraint}")]
    InvalidHyperparameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// I/O error (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or corrupt checkpoint container.
    #[error("invalid checkpoint format: {0}")]
    Format(String),
}

impl RelGatError {
    /// Create a dimension mismatch error with descriptive context.
    #[must_use]
    pub fn dimension_mismatch(context: &str, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            expected: format!("{context}={expected}"),
            actual: format!("{actual}"),
        }
    }

    /// Create a shape mismatch error from two shapes.
    #[must_use]
    pub fn shape_mismatch(context: &str, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: format!("{context} {expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    /// Create a rank mismatch error.
    #[must_use]
    pub fn rank_mismatch(context: &str, expected: usize, actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: format!("{context} of rank {expected}"),
            actual: format!("rank {} {actual:?}", actual.len()),
        }
    }

    /// Create an invalid hyperparameter error.
    #[must_use]
    pub fn invalid_hyperparameter(param: &str, value: impl ToString, constraint: &str) -> Self {
        Self::InvalidHyperparameter {
            param: param.to_string(),
            value: value.to_string(),
            constraint: constraint.to_string(),
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, RelGatError>;
