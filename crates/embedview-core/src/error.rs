//! Engine error types

use thiserror::Error;

/// Errors raised while building or driving an embedding session.
///
/// Everything except [`EmbedError::NonFiniteEmbedding`] is an input
/// validation failure raised before any optimizer state exists.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbedError {
    /// Fewer entities than the engine can embed
    #[error("insufficient data: need at least {required} entities, got {found}")]
    InsufficientData { required: usize, found: usize },

    /// Perplexity outside the open interval (1, n/3)
    #[error("invalid perplexity {perplexity}: must satisfy 1 < perplexity < {upper}")]
    InvalidPerplexity { perplexity: f64, upper: f64 },

    /// A required pair is absent from the distance table
    #[error("incomplete distance table: no distance between '{first}' and '{second}'")]
    IncompleteDistanceTable { first: String, second: String },

    /// Both directions of a pair were supplied and disagree
    #[error("inconsistent distance between '{first}' and '{second}': {forward} vs {backward}")]
    InconsistentDistance {
        first: String,
        second: String,
        forward: f64,
        backward: f64,
    },

    /// NaN or infinite distance (or feature value)
    #[error("non-finite distance between '{first}' and '{second}'")]
    NonFiniteDistance { first: String, second: String },

    #[error("negative distance {distance} between '{first}' and '{second}'")]
    NegativeDistance {
        first: String,
        second: String,
        distance: f64,
    },

    /// A step produced NaN or infinite coordinates; the step was rejected
    #[error("embedding diverged at iteration {iteration}: randomize or lower the learning rate")]
    NonFiniteEmbedding { iteration: u64 },

    #[error("feature vector for '{entity}' has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        entity: String,
        expected: usize,
        found: usize,
    },

    #[error("duplicate entity id: {0}")]
    DuplicateEntity(String),

    #[error("point index {index} out of range for {len} points")]
    PointOutOfRange { index: usize, len: usize },

    #[error("non-finite position for point {index}")]
    InvalidPosition { index: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EmbedError {
    /// Whether the session can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NonFiniteEmbedding { .. })
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EmbedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_divergence_is_recoverable() {
        assert!(EmbedError::NonFiniteEmbedding { iteration: 3 }.is_recoverable());
        assert!(!EmbedError::InsufficientData {
            required: 4,
            found: 2
        }
        .is_recoverable());
        assert!(!EmbedError::InvalidPerplexity {
            perplexity: 5.0,
            upper: 2.0
        }
        .is_recoverable());
    }

    #[test]
    fn messages_name_the_entities() {
        let err = EmbedError::IncompleteDistanceTable {
            first: "a".into(),
            second: "b".into(),
        };
        assert_eq!(
            err.to_string(),
            "incomplete distance table: no distance between 'a' and 'b'"
        );
    }
}
