//! Focal Tversky loss.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor},
};

use crate::config::LOSS_EPSILON;

/// Configuration for the Focal Tversky loss function.
#[derive(Config, Debug)]
pub struct FocalTverskyLossConfig {
    #[config(default = 1e-6)]
    pub smooth: f32,
    /// Trade-off between penalizing false negatives (`delta`) and false
    /// positives (`1 - delta`).
    #[config(default = 0.7)]
    pub delta: f32,
    /// Focal exponent applied to `1 - tversky`.
    #[config(default = 0.75)]
    pub gamma: f32,
}

/// Focal Tversky loss, `mean((1 - tversky)^gamma)`.
///
/// Predictions are clipped away from 0 and 1 before the index is formed.
#[derive(Module, Debug)]
pub struct FocalTverskyLoss<B: Backend> {
    pub smooth: f32,
    pub delta: f32,
    pub gamma: f32,
    _phantom: std::marker::PhantomData<B>,
}

impl FocalTverskyLossConfig {
    /// Initialize a new Focal Tversky loss function with the given configuration.
    pub const fn init<B: Backend>(&self) -> FocalTverskyLoss<B> {
        FocalTverskyLoss {
            smooth: self.smooth,
            delta: self.delta,
            gamma: self.gamma,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for FocalTverskyLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> FocalTverskyLoss<B> {
    /// Create a new Focal Tversky loss function with default configuration.
    pub fn new() -> Self {
        FocalTverskyLossConfig::new().init()
    }

    /// Calculate the Focal Tversky loss for `[N, C, H, W]` mask pairs.
    pub fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Tensor<B, 1> {
        let y_pred = y_pred.clamp(LOSS_EPSILON, 1.0 - LOSS_EPSILON);

        let [batch, channels, height, width] = y_true.dims();
        let y_true = y_true.reshape([batch, channels * height * width]);
        let y_pred = y_pred.reshape([batch, channels * height * width]);

        let true_pos = (y_true.clone() * y_pred.clone()).sum_dim(1);
        let false_neg = (y_true.clone() * (Tensor::ones_like(&y_pred) - y_pred.clone())).sum_dim(1);
        let false_pos = ((Tensor::ones_like(&y_true) - y_true) * y_pred).sum_dim(1);

        let tversky = (true_pos.clone() + self.smooth)
            / (true_pos + false_neg * self.delta + false_pos * (1.0 - self.delta) + self.smooth);

        (Tensor::ones_like(&tversky) - tversky)
            .powf_scalar(self.gamma)
            .mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn perfect_prediction_is_near_zero() {
        let device = Default::default();
        let loss = FocalTverskyLoss::<TestBackend>::new();

        let mask = Tensor::ones([1, 1, 8, 8], &device);
        let value = loss.forward(mask.clone(), mask).into_scalar().elem::<f32>();
        // The epsilon clip keeps predictions just under 1, so the index
        // lands just under a perfect score.
        assert!(value < 1e-3, "perfect tversky loss should be ~0, got {value}");
    }

    #[test]
    fn false_negatives_cost_more_than_false_positives() {
        let device = Default::default();
        let loss = FocalTverskyLoss::<TestBackend>::new();

        // Half the object missed (false negatives only).
        let mut full = vec![0.0f32; 64];
        let mut half = vec![0.0f32; 64];
        for i in 0..32 {
            full[i] = 1.0;
            full[i + 32] = 1.0;
            half[i] = 1.0;
        }
        let full = Tensor::<TestBackend, 1>::from_floats(full.as_slice(), &device)
            .reshape([1, 1, 8, 8]);
        let half = Tensor::<TestBackend, 1>::from_floats(half.as_slice(), &device)
            .reshape([1, 1, 8, 8]);

        let miss = loss
            .forward(full.clone(), half.clone())
            .into_scalar()
            .elem::<f32>();
        let over = loss.forward(half, full).into_scalar().elem::<f32>();

        // delta = 0.7 weights false negatives above false positives.
        assert!(miss > over, "under-segmentation should cost more: {miss} <= {over}");
    }
}
