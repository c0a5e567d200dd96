//! Jaccard (intersection-over-union) loss.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the Jaccard loss function.
#[derive(Config, Debug)]
pub struct JaccardLossConfig {
    #[config(default = 1.0)]
    pub smooth: f32,
}

/// Jaccard loss, `1 - mean(IoU)` over the batch.
///
/// Intersection and union are summed over all non-batch axes per sample.
#[derive(Module, Debug)]
pub struct JaccardLoss<B: Backend> {
    pub smooth: f32,
    _phantom: std::marker::PhantomData<B>,
}

impl JaccardLossConfig {
    /// Initialize a new Jaccard loss function with the given configuration.
    pub const fn init<B: Backend>(&self) -> JaccardLoss<B> {
        JaccardLoss {
            smooth: self.smooth,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for JaccardLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> JaccardLoss<B> {
    /// Create a new Jaccard loss function with default configuration.
    pub fn new() -> Self {
        JaccardLossConfig::new().init()
    }

    /// Calculate the Jaccard loss for `[N, C, H, W]` mask pairs.
    pub fn forward(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Tensor<B, 1> {
        let [batch, channels, height, width] = y_true.dims();
        let y_true = y_true.reshape([batch, channels * height * width]);
        let y_pred = y_pred.reshape([batch, channels * height * width]);

        let intersection = (y_true.clone() * y_pred.clone()).abs().sum_dim(1);
        let union = y_true.sum_dim(1) + y_pred.sum_dim(1) - intersection.clone();

        let iou = (intersection + self.smooth) / (union + self.smooth);
        let iou = iou.mean();

        Tensor::ones_like(&iou) - iou
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn perfect_overlap_is_near_zero() {
        let device = Default::default();
        let loss = JaccardLoss::<TestBackend>::new();

        let mask = Tensor::ones([2, 1, 8, 8], &device);
        let value = loss.forward(mask.clone(), mask).into_scalar().elem::<f32>();
        assert!(value.abs() < 1e-2, "perfect IoU should be ~0, got {value}");
    }

    #[test]
    fn disjoint_masks_approach_one() {
        let device = Default::default();
        let loss = JaccardLoss::<TestBackend>::new();

        // Left half vs right half of a 1x16x16 mask: no overlap.
        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];
        for row in 0..16 {
            for col in 0..8 {
                left[row * 16 + col] = 1.0;
                right[row * 16 + col + 8] = 1.0;
            }
        }
        let y_true = Tensor::<TestBackend, 1>::from_floats(left.as_slice(), &device)
            .reshape([1, 1, 16, 16]);
        let y_pred = Tensor::<TestBackend, 1>::from_floats(right.as_slice(), &device)
            .reshape([1, 1, 16, 16]);

        let value = loss.forward(y_true, y_pred).into_scalar().elem::<f32>();
        assert!(value > 0.95, "disjoint IoU loss should approach 1, got {value}");
    }
}
