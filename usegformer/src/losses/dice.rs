//! Dice loss.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the Dice loss function.
#[derive(Config, Debug)]
pub struct DiceLossConfig {
    /// Carried by the training-driver contract; the reduction itself does
    /// not consume it.
    #[config(default = 1.0)]
    pub weight: f32,
    #[config(default = 1.0)]
    pub smooth: f32,
}

/// Dice loss, `1 - mean(2 * intersection / union)`.
///
/// Sums run over the spatial axes only: the class axis stays unreduced
/// until the final mean, so each class gets its own smoothed ratio. This
/// differs from [`JaccardLoss`](super::JaccardLoss), which folds the class
/// axis into the per-sample sums; both behaviors are intentional.
#[derive(Module, Debug)]
pub struct DiceLoss<B: Backend> {
    pub weight: f32,
    pub smooth: f32,
    _phantom: std::marker::PhantomData<B>,
}

impl DiceLossConfig {
    /// Initialize a new Dice loss function with the given configuration.
    pub const fn init<B: Backend>(&self) -> DiceLoss<B> {
        DiceLoss {
            weight: self.weight,
            smooth: self.smooth,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for DiceLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> DiceLoss<B> {
    /// Create a new Dice loss function with default configuration.
    pub fn new() -> Self {
        DiceLossConfig::new().init()
    }

    /// Calculate the Dice loss for `[N, C, H, W]` mask pairs.
    pub fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Tensor<B, 1> {
        let [batch, channels, height, width] = y_true.dims();
        let y_true = y_true.reshape([batch, channels, height * width]);
        let y_pred = y_pred.reshape([batch, channels, height * width]);

        // [batch, channels] sums over the spatial positions.
        let intersection = (y_true.clone() * y_pred.clone())
            .abs()
            .sum_dim(2)
            .reshape([batch, channels]);
        let union = (y_true.sum_dim(2) + y_pred.sum_dim(2)).reshape([batch, channels]);

        let dice = (intersection * 2.0 + self.smooth) / (union + self.smooth);
        let dice = dice.mean_dim(0);

        (Tensor::ones_like(&dice) - dice).mean()
    }
}
