use std::path::PathBuf;

use burn::backend::NdArray;
use burn::prelude::*;

use crate::losses::DiceLoss;
use crate::models::modules::ResidualBlockConfig;
use crate::{RunConfig, USegFormerError};

type TestBackend = NdArray<f32>;

fn run_config() -> RunConfig {
    RunConfig::new(
        PathBuf::from("data/train"),
        PathBuf::from("data/test"),
        PathBuf::from("checkpoints"),
    )
}

#[test]
fn default_run_config_is_valid() {
    assert!(run_config().validate().is_ok());
}

#[test]
fn zero_batch_size_is_rejected() {
    let config = run_config().with_batch_size(0);

    match config.validate() {
        Err(USegFormerError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("batch_size"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn odd_input_shape_is_rejected() {
    let config = run_config().with_input_shape([255, 256, 3]);

    match config.validate() {
        Err(USegFormerError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("even"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn non_positive_lr_is_rejected() {
    let config = run_config().with_lr(0.0);

    assert!(config.validate().is_err());
}

/// A synthetic 64x64x3 image runs through a residual block while the
/// all-ones target mask dices against itself: the forward pass must
/// produce the widened feature map and the loss must sit at zero within
/// the smoothing tolerance.
#[test]
fn synthetic_image_and_mask_roundtrip() {
    let device = Default::default();

    let block = ResidualBlockConfig::new(3, 16).init::<TestBackend>(&device);
    let image = Tensor::random(
        [1, 3, 64, 64],
        burn::tensor::Distribution::Uniform(0.0, 1.0),
        &device,
    );
    let features = block.forward(image);
    assert_eq!(features.dims(), [1, 16, 64, 64]);

    let mask = Tensor::<TestBackend, 4>::ones([1, 1, 64, 64], &device);
    let loss = DiceLoss::<TestBackend>::new()
        .forward(mask.clone(), mask)
        .into_scalar()
        .elem::<f32>();
    assert!(loss.abs() < 1e-3, "self-dice should vanish, got {loss}");
}
