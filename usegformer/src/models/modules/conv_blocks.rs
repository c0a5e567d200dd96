//! Convolutional encoder/decoder blocks.
//!
//! `ResidualBlock`, `DownSample`, and `UpSample` are the basic units the
//! U-shaped encoder-decoder is assembled from.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        GroupNorm, PaddingConfig2d,
    },
    prelude::*,
};

use super::{normalize, Activation};
use crate::special::{scaled_conv2d, scaled_conv_transpose2d};

/// Configuration for the `ResidualBlock` module.
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels.
    pub width: usize,
    #[config(default = "Activation::Silu")]
    pub activation: Activation,
}

impl ResidualBlockConfig {
    /// Initializes a new `ResidualBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ResidualBlock<B> {
        // Identity skip when the channel count already matches, otherwise a
        // 1x1 projection.
        let conv_skip = (self.in_channels != self.width).then(|| {
            scaled_conv2d(
                Conv2dConfig::new([self.in_channels, self.width], [1, 1]).init(device),
                1.0,
            )
        });

        let norm_in = normalize(self.in_channels, device);
        let conv_in = scaled_conv2d(
            Conv2dConfig::new([self.in_channels, self.width], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            1.0,
        );
        let norm_out = normalize(self.width, device);
        // Zero-scaled so the block starts out as (approximately) the skip
        // path alone.
        let conv_out = scaled_conv2d(
            Conv2dConfig::new([self.width, self.width], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            0.0,
        );

        ResidualBlock {
            conv_skip,
            norm_in,
            conv_in,
            norm_out,
            conv_out,
            activation: self.activation,
        }
    }
}

/// Residual block with two 3x3 convolutions and pre-activation group norm.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv_skip: Option<Conv2d<B>>,
    norm_in: GroupNorm<B>,
    conv_in: Conv2d<B>,
    norm_out: GroupNorm<B>,
    conv_out: Conv2d<B>,
    activation: Activation,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = match &self.conv_skip {
            Some(proj) => proj.forward(x.clone()),
            None => x.clone(),
        };

        let x = self.norm_in.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv_in.forward(x);

        let x = self.norm_out.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv_out.forward(x);

        x + residual
    }
}

/// Configuration for the `DownSample` module.
#[derive(Config, Debug)]
pub struct DownSampleConfig {
    /// Unused by the pooling itself; kept so the down/up pair share a
    /// construction signature.
    pub width: usize,
}

impl DownSampleConfig {
    /// Initializes a new `DownSample` module.
    pub fn init(&self) -> DownSample {
        DownSample {
            width: self.width,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

/// 2x2 max-pooling; halves the spatial resolution.
#[derive(Module, Debug, Clone)]
pub struct DownSample {
    width: usize,
    pool: MaxPool2d,
}

impl DownSample {
    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(x)
    }
}

/// Configuration for the `UpSample` module.
#[derive(Config, Debug)]
pub struct UpSampleConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels.
    pub width: usize,
    #[config(default = "Activation::Silu")]
    pub activation: Activation,
}

impl UpSampleConfig {
    /// Initializes a new `UpSample` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> UpSample<B> {
        // 5x5 transposed convolution, stride 2: doubles H and W with
        // padding 2 and output padding 1.
        let conv = scaled_conv_transpose2d(
            ConvTranspose2dConfig::new([self.in_channels, self.width], [5, 5])
                .with_stride([2, 2])
                .with_padding([2, 2])
                .with_padding_out([1, 1])
                .init(device),
            1.0,
        );
        let norm = normalize(self.width, device);

        UpSample {
            conv,
            norm,
            activation: self.activation,
        }
    }
}

/// 5x5 transposed convolution (stride 2) with group norm and activation;
/// doubles the spatial resolution.
#[derive(Module, Debug)]
pub struct UpSample<B: Backend> {
    conv: ConvTranspose2d<B>,
    norm: GroupNorm<B>,
    activation: Activation,
}

impl<B: Backend> UpSample<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}
