//! Generalized Dice loss with inverse-square class-frequency weighting.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor},
};

use crate::config::LOSS_EPSILON;

/// Configuration for the Generalized Dice loss function.
#[derive(Config, Debug)]
pub struct GeneralizedDiceLossConfig {
    #[config(default = "LOSS_EPSILON")]
    pub epsilon: f32,
}

/// Generalized Dice loss.
///
/// Each class is weighted by the inverse square of its pixel count in the
/// ground truth. Classes absent from a sample produce an infinite weight
/// and a zero denominator; both are masked to finite values so the final
/// batch mean never goes NaN.
#[derive(Module, Debug)]
pub struct GeneralizedDiceLoss<B: Backend> {
    pub epsilon: f32,
    _phantom: std::marker::PhantomData<B>,
}

impl GeneralizedDiceLossConfig {
    /// Initialize a new Generalized Dice loss function with the given configuration.
    pub const fn init<B: Backend>(&self) -> GeneralizedDiceLoss<B> {
        GeneralizedDiceLoss {
            epsilon: self.epsilon,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for GeneralizedDiceLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> GeneralizedDiceLoss<B> {
    /// Create a new Generalized Dice loss function with default configuration.
    pub fn new() -> Self {
        GeneralizedDiceLossConfig::new().init()
    }

    /// Calculate the Generalized Dice loss for `[N, C, H, W]` mask pairs.
    pub fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Tensor<B, 1> {
        let [batch, channels, height, width] = y_true.dims();
        let y_true = y_true.reshape([batch, channels, height * width]);
        let y_pred = y_pred.reshape([batch, channels, height * width]);

        // [batch, channels] pixel counts per class; a count of zero would
        // give an infinite weight, so those entries fall back to epsilon.
        let counts = y_true.clone().sum_dim(2).reshape([batch, channels]);
        let counts_sq = counts.powf_scalar(2.0);
        let weights = counts_sq
            .clone()
            .recip()
            .mask_fill(counts_sq.equal_elem(0.0), self.epsilon);

        let multed = (y_true.clone() * y_pred.clone())
            .sum_dim(2)
            .reshape([batch, channels]);
        let summed = (y_true + y_pred).sum_dim(2).reshape([batch, channels]);

        // [batch] weighted ratios; an all-empty sample zeroes the
        // denominator and is masked out of the mean.
        let numerators = (weights.clone() * multed).sum_dim(1).reshape([batch]);
        let denom = (weights * summed).sum_dim(1).reshape([batch]);

        let dices = Tensor::ones_like(&numerators) - numerators * 2.0 / denom.clone();
        let dices = dices.mask_fill(denom.equal_elem(0.0), 0.0);

        dices.mean()
    }
}
