//! # USegFormer-Burn
//!
//! Building blocks for a U-shaped segmentation network with a
//! Transformer-style bottleneck, together with the family of
//! region-overlap losses used to train it.
//!
//! The crate is a component library: the blocks in [`models`] are
//! shape-polymorphic tensor transforms meant to be wired into a full
//! encoder-decoder by an external model-assembly crate, and the losses in
//! [`losses`] match the `(y_true, y_pred) -> scalar` contract of an
//! external training loop.

mod config;
mod error;
pub mod losses;
pub mod models;
mod special;

pub use config::*;
pub use error::{USegFormerError, USegFormerResult};

#[cfg(test)]
mod tests;
