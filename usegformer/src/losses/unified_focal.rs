//! Asymmetric unified focal loss.
//!
//! Blends a Dice-based term and a cross-entropy-based term into a single
//! framework for class-imbalanced segmentation. The background-class
//! branches of the published formulation are dropped; only the foreground
//! terms remain.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor},
};

use crate::config::LOSS_EPSILON;

/// Configuration for the asymmetric unified focal loss function.
#[derive(Config, Debug)]
pub struct AsymUnifiedFocalLossConfig {
    /// Blend between the focal-Tversky term and the focal cross-entropy
    /// term.
    #[config(default = 0.5)]
    pub weight: f32,
    /// Class weighting shared by both terms.
    #[config(default = 0.6)]
    pub delta: f32,
    /// Focal shape parameter for the Tversky term.
    #[config(default = 0.5)]
    pub gamma: f32,
}

/// Asymmetric unified focal loss,
/// `weight * focal_tversky + (1 - weight) * focal_ce`.
#[derive(Module, Debug)]
pub struct AsymUnifiedFocalLoss<B: Backend> {
    pub weight: f32,
    pub delta: f32,
    pub gamma: f32,
    _phantom: std::marker::PhantomData<B>,
}

impl AsymUnifiedFocalLossConfig {
    /// Initialize a new asymmetric unified focal loss function with the given configuration.
    pub const fn init<B: Backend>(&self) -> AsymUnifiedFocalLoss<B> {
        AsymUnifiedFocalLoss {
            weight: self.weight,
            delta: self.delta,
            gamma: self.gamma,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for AsymUnifiedFocalLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> AsymUnifiedFocalLoss<B> {
    /// Create a new asymmetric unified focal loss function with default configuration.
    pub fn new() -> Self {
        AsymUnifiedFocalLossConfig::new().init()
    }

    /// Asymmetric focal Tversky term.
    ///
    /// Per-class Tversky over the spatial axes, sharpened as
    /// `(1 - dice)^(1 - gamma)` for the foreground.
    pub fn asymmetric_focal_tversky_loss(
        &self,
        y_true: Tensor<B, 4>,
        y_pred: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let y_pred = y_pred.clamp(LOSS_EPSILON, 1.0 - LOSS_EPSILON);

        let [batch, channels, height, width] = y_true.dims();
        let y_true = y_true.reshape([batch, channels, height * width]);
        let y_pred = y_pred.reshape([batch, channels, height * width]);

        let true_pos = (y_true.clone() * y_pred.clone())
            .sum_dim(2)
            .reshape([batch, channels]);
        let false_neg = (y_true.clone() * (Tensor::ones_like(&y_pred) - y_pred.clone()))
            .sum_dim(2)
            .reshape([batch, channels]);
        let false_pos = ((Tensor::ones_like(&y_true) - y_true) * y_pred)
            .sum_dim(2)
            .reshape([batch, channels]);

        let dice_class = (true_pos.clone() + LOSS_EPSILON)
            / (true_pos
                + false_neg * self.delta
                + false_pos * (1.0 - self.delta)
                + LOSS_EPSILON);

        // (1 - d) * (1 - d)^-gamma
        let fore_dice = (Tensor::ones_like(&dice_class) - dice_class)
            .powf_scalar(1.0 - self.gamma);

        fore_dice.mean()
    }

    /// Asymmetric focal cross-entropy term.
    ///
    /// Foreground-only weighted cross-entropy; the focal exponent of the
    /// published loss applies to the (removed) background branch, so
    /// `gamma` does not appear here.
    pub fn asymmetric_focal_loss(
        &self,
        y_true: Tensor<B, 4>,
        y_pred: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let y_pred = y_pred.clamp(LOSS_EPSILON, 1.0 - LOSS_EPSILON);
        let cross_entropy = (y_true * y_pred.log()).neg();

        (cross_entropy * self.delta).mean()
    }

    /// Calculate the unified loss for `[N, C, H, W]` mask pairs.
    pub fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Tensor<B, 1> {
        let tversky = self.asymmetric_focal_tversky_loss(y_true.clone(), y_pred.clone());
        let focal = self.asymmetric_focal_loss(y_true, y_pred);

        tversky * self.weight + focal * (1.0 - self.weight)
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
        let loss = AsymUnifiedFocalLoss::<TestBackend>::new();

        let mask = Tensor::ones([1, 1, 8, 8], &device);
        let value = loss.forward(mask.clone(), mask).into_scalar().elem::<f32>();
        assert!(value < 1e-2, "perfect prediction should be ~0, got {value}");
        assert!(value >= 0.0);
    }

    #[test]
    fn blend_is_bounded_by_its_terms() {
        let device = Default::default();
        let loss = AsymUnifiedFocalLoss::<TestBackend>::new();

        let y_true = Tensor::<TestBackend, 4>::ones([1, 1, 8, 8], &device);
        let y_pred = Tensor::<TestBackend, 4>::ones([1, 1, 8, 8], &device) * 0.5;

        let tversky = loss
            .asymmetric_focal_tversky_loss(y_true.clone(), y_pred.clone())
            .into_scalar()
            .elem::<f32>();
        let focal = loss
            .asymmetric_focal_loss(y_true.clone(), y_pred.clone())
            .into_scalar()
            .elem::<f32>();
        let total = loss.forward(y_true, y_pred).into_scalar().elem::<f32>();

        let lo = tversky.min(focal);
        let hi = tversky.max(focal);
        assert!(
            total >= lo - 1e-6 && total <= hi + 1e-6,
            "blend {total} outside [{lo}, {hi}]"
        );
    }

    #[test]
    fn clipping_keeps_confident_mistakes_finite() {
        let device = Default::default();
        let loss = AsymUnifiedFocalLoss::<TestBackend>::new();

        let y_true = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], &device);
        let y_pred = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);

        let value = loss.forward(y_true, y_pred).into_scalar().elem::<f32>();
        assert!(value.is_finite(), "log of clipped zero must stay finite");
        assert!(value > 1.0, "confident miss should be expensive, got {value}");
    }
}
