//! Reflection database errors

use thiserror::Error;

/// Errors produced while building the reflection database or converting
/// between `Value` and plain Rust types.
#[derive(Debug, Error)]
pub enum ReflectError {
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("duplicate type name `{0}`")]
    DuplicateType(String),

    #[error("defaulted parameters of `{0}` must be trailing")]
    NonTrailingDefault(String),

    #[error("operator `{0}` must take exactly two parameters")]
    BadOperatorArity(String),

    #[error("reserved type id {0} was never defined")]
    UndefinedReservation(usize),

    #[error("type id {reserved} was reserved as `{expected}` but defined as `{got}`")]
    ReservationMismatch {
        reserved: usize,
        expected: String,
        got: String,
    },
}
