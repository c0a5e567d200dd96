//! Low-level numeric helpers that are not part of the standard Burn library.
//!
//! - `init`: truncated-normal sampling (via a tensor inverse error
//!   function) and the variance-scaling weight initializer applied to
//!   convolution and dense layers.

mod init;

pub use init::*;
