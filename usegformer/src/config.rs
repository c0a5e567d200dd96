//! Run configuration and shared numeric constants.
//!
//! The constants collect the floating-point guards that the network and
//! loss code rely on, so that every epsilon lives in one place instead of
//! being an implicit framework default.

use std::path::PathBuf;

use burn::prelude::*;

use crate::error::{USegFormerError, USegFormerResult};

/// Clipping floor/ceiling offset for predicted probabilities and the
/// replacement value for non-finite class weights in the losses.
pub const LOSS_EPSILON: f32 = 1e-7;

/// Epsilon used by every group normalization layer.
pub const GROUP_NORM_EPSILON: f64 = 1e-5;

/// Epsilon used by the ViT layer norms.
pub const LAYER_NORM_EPSILON: f64 = 1e-6;

/// Floor for the variance-scaling initializer scale. A scale of zero
/// requests a near-no-op projection, not a degenerate distribution.
pub const KERNEL_INIT_MIN_SCALE: f64 = 1e-10;

/// Configuration surface consumed by the external training driver.
///
/// A copy of this config is persisted next to the checkpoints by the
/// driver, so the field set mirrors what the run script reads.
#[derive(Config, Debug)]
pub struct RunConfig {
    /// Directory of training image/mask pairs.
    pub train_path: PathBuf,
    /// Directory of evaluation image/mask pairs.
    pub test_path: PathBuf,
    /// Directory that receives checkpoints, logs, and the config copy.
    pub checkpoint_path: PathBuf,
    /// Optional pretrained U-Net checkpoint to warm-start from.
    #[config(default = "None")]
    pub unet_checkpoint_path: Option<PathBuf>,
    /// Input shape as `[height, width, channels]`.
    #[config(default = "[256, 256, 3]")]
    pub input_shape: [usize; 3],
    #[config(default = "8")]
    pub batch_size: usize,
    #[config(default = "100")]
    pub epochs: usize,
    /// Peak learning rate after warmup.
    #[config(default = "1e-4")]
    pub lr: f64,
    /// Number of warmup steps for the step scheduler.
    #[config(default = "1000")]
    pub step_warmup: usize,
}

impl RunConfig {
    /// Validate the configuration and return an error for inconsistent settings.
    pub fn validate(&self) -> USegFormerResult<()> {
        if self.batch_size == 0 {
            return Err(USegFormerError::InvalidConfiguration {
                reason: "batch_size must be greater than zero".to_owned(),
            });
        }
        if self.epochs == 0 {
            return Err(USegFormerError::InvalidConfiguration {
                reason: "epochs must be greater than zero".to_owned(),
            });
        }
        let [height, width, channels] = self.input_shape;
        if height == 0 || width == 0 || channels == 0 {
            return Err(USegFormerError::InvalidConfiguration {
                reason: format!(
                    "input_shape dimensions must be non-zero, got [{height}, {width}, {channels}]"
                ),
            });
        }
        if height % 2 != 0 || width % 2 != 0 {
            return Err(USegFormerError::InvalidConfiguration {
                reason: "input height and width must be even for the down/up-sampling pairs"
                    .to_owned(),
            });
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(USegFormerError::InvalidConfiguration {
                reason: format!("lr must be a positive finite value, got {}", self.lr),
            });
        }
        Ok(())
    }
}
