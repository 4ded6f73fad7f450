use crate::sketch::constraint::ConstraintId;
use thiserror::Error;

/// Errors raised at the caller boundary (constraint construction and
/// system mutation). Numeric solve outcomes are never errors; they are
/// reported as `SolveStatus` values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SketchError {
    #[error("constraint {0} already exists in the system")]
    DuplicateConstraintId(ConstraintId),

    #[error("constraint {0} carries no dimensional value")]
    NotDimensional(ConstraintId),

    #[error("geometry reference does not name a valid entity")]
    InvalidReference,
}
