//! Combo loss: weighted cross-entropy blended against Dice.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor},
};

use crate::config::LOSS_EPSILON;

/// Configuration for the Combo loss function.
#[derive(Config, Debug)]
pub struct ComboLossConfig {
    /// Blend between the cross-entropy term and the Dice term.
    #[config(default = 0.5)]
    pub alpha: f32,
    /// Class weighting applied to the cross-entropy as `[beta, 1 - beta]`.
    #[config(default = 0.5)]
    pub beta: f32,
    #[config(default = 1.0)]
    pub smooth: f32,
}

/// Combo loss, `alpha * weighted_BCE - (1 - alpha) * dice`.
///
/// The cross-entropy runs on the flattened tensors and is then reweighted
/// by the fixed two-element vector `[beta, 1 - beta]`; that contract only
/// holds meaning for a two-class weighting and is kept as-is.
#[derive(Module, Debug)]
pub struct ComboLoss<B: Backend> {
    pub alpha: f32,
    pub beta: f32,
    pub smooth: f32,
    _phantom: std::marker::PhantomData<B>,
}

impl ComboLossConfig {
    /// Initialize a new Combo loss function with the given configuration.
    pub const fn init<B: Backend>(&self) -> ComboLoss<B> {
        ComboLoss {
            alpha: self.alpha,
            beta: self.beta,
            smooth: self.smooth,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for ComboLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ComboLoss<B> {
    /// Create a new Combo loss function with default configuration.
    pub fn new() -> Self {
        ComboLossConfig::new().init()
    }

    /// Calculate the Combo loss for `[N, C, H, W]` mask pairs.
    pub fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Tensor<B, 1> {
        let device = y_pred.device();
        let [batch, channels, height, width] = y_true.dims();

        // Dice with the class axis folded into the per-sample sums.
        let flat_true = y_true.clone().reshape([batch, channels * height * width]);
        let flat_pred = y_pred.clone().reshape([batch, channels * height * width]);
        let intersection = (flat_true.clone() * flat_pred.clone()).abs().sum_dim(1);
        let union = flat_true.sum_dim(1) + flat_pred.sum_dim(1);
        let dice = ((intersection * 2.0 + self.smooth) / (union + self.smooth)).mean();

        // Numerically stable with-logits cross-entropy on the clipped,
        // fully flattened predictions.
        let y_pred = y_pred.clamp(LOSS_EPSILON, 1.0 - LOSS_EPSILON);
        let logits = y_pred.flatten::<1>(0, 3);
        let targets = y_true.flatten::<1>(0, 3);
        let term1 = logits.clone().clamp_min(0.0) - logits.clone() * targets;
        let term2 = logits.abs().neg().exp().add_scalar(1.0).log();
        let cross_entropy = (term1 + term2).mean();

        let beta_weight =
            Tensor::<B, 1>::from_floats([self.beta, 1.0 - self.beta], &device);
        let cross_entropy = (beta_weight * cross_entropy).sum();

        cross_entropy * self.alpha - dice * (1.0 - self.alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn perfect_overlap_rewards_dice_term() {
        let device = Default::default();
        let loss = ComboLoss::<TestBackend>::new();

        let mask = Tensor::ones([1, 2, 4, 4], &device);
        let value = loss.forward(mask.clone(), mask).into_scalar().elem::<f32>();

        // Dice ~ 1 contributes -(1 - alpha); the clipped-logit BCE of an
        // all-ones pair is ln(1 + e^-1) + ... > 0, so the total stays
        // bounded but the dice reward must be visible.
        assert!(value < 0.2, "combo loss should reward perfect overlap, got {value}");
        assert!(value.is_finite());
    }

    #[test]
    fn worse_overlap_increases_loss() {
        let device = Default::default();
        let loss = ComboLoss::<TestBackend>::new();

        let y_true = Tensor::<TestBackend, 4>::ones([1, 2, 4, 4], &device);
        let good = loss
            .forward(y_true.clone(), y_true.clone())
            .into_scalar()
            .elem::<f32>();
        let bad = loss
            .forward(y_true, Tensor::zeros([1, 2, 4, 4], &device))
            .into_scalar()
            .elem::<f32>();

        assert!(bad > good, "disjoint masks should score worse: {bad} <= {good}");
    }
}
