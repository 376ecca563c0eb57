//! Construction-time validation errors.
//!
//! The engine never fails mid-run: numerical trouble degrades into pruned
//! spokes and repair counters instead. Errors are only raised before any
//! work starts, when the request itself is unusable.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoronoiError {
    #[error("Cannot tessellate an empty point set")]
    EmptyPointSet,
    #[error("Point {0} has a non-finite coordinate")]
    NonFinitePoint(usize),
    #[error("Prune tolerance {0} is outside [0, 0.5)")]
    InvalidPruneTolerance(f64),
    #[error("Batch size must be nonzero")]
    InvalidBatchSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            VoronoiError::NonFinitePoint(4).to_string(),
            "Point 4 has a non-finite coordinate"
        );
        assert_eq!(
            VoronoiError::InvalidPruneTolerance(0.7).to_string(),
            "Prune tolerance 0.7 is outside [0, 0.5)"
        );
    }
}
