use thiserror::Error;

/// The error type for `usegformer-burn` operations.
///
/// Only configuration problems are reported through this type. Tensor
/// shape and rank mismatches are deliberately not validated here; they
/// surface as runtime errors from the backend when a forward pass runs.
#[derive(Error, Debug)]
pub enum USegFormerError {
    /// A configuration is logically inconsistent or out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for `usegformer-burn` operations.
pub type USegFormerResult<T> = Result<T, USegFormerError>;
