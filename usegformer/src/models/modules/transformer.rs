//! Transformer bottleneck blocks.
//!
//! `Geglu` and `BasicTransformerBlock` build the gated-attention stage;
//! `SpatialTransformer` wraps a stack of blocks with a learned context
//! rescaler so that a secondary feature map of any spatial resolution can
//! feed the cross-attention.

use std::sync::OnceLock;

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        GroupNorm, GroupNormConfig,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use super::{quick_gelu, AttentionBlock, AttentionBlockConfig, CrossAttentionBlock, CrossAttentionBlockConfig};
use crate::config::GROUP_NORM_EPSILON;
use crate::special::scaled_conv2d;

/// Configuration for the `Geglu` module.
#[derive(Config, Debug)]
pub struct GegluConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels.
    pub dim_out: usize,
}

impl GegluConfig {
    /// Initializes a new `Geglu` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Geglu<B> {
        let proj = scaled_conv2d(
            Conv2dConfig::new([self.in_channels, self.dim_out * 2], [1, 1]).init(device),
            1.0,
        );

        Geglu {
            proj,
            dim_out: self.dim_out,
        }
    }
}

/// Gated-GELU feed-forward unit.
///
/// A single 1x1 convolution projects to `2 * dim_out` channels; the first
/// half is the value, the second half gates it through `quick_gelu`.
#[derive(Module, Debug)]
pub struct Geglu<B: Backend> {
    proj: Conv2d<B>,
    dim_out: usize,
}

impl<B: Backend> Geglu<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let xp = self.proj.forward(x);
        let [batch, channels, height, width] = xp.dims();

        let value = xp
            .clone()
            .slice([0..batch, 0..self.dim_out, 0..height, 0..width]);
        let gate = xp.slice([0..batch, self.dim_out..channels, 0..height, 0..width]);

        value * quick_gelu(gate)
    }
}

/// Configuration for the `BasicTransformerBlock` module.
#[derive(Config, Debug)]
pub struct BasicTransformerBlockConfig {
    /// Channel width of the block.
    pub dim: usize,
    /// Number of context channels for the cross-attention stage.
    /// Defaults to `dim`.
    #[config(default = "None")]
    pub context_channels: Option<usize>,
}

impl BasicTransformerBlockConfig {
    /// Initializes a new `BasicTransformerBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> BasicTransformerBlock<B> {
        let attn_self = AttentionBlockConfig::new(self.dim).init(device);
        let attn_cross = CrossAttentionBlockConfig::new(self.dim)
            .with_context_channels(self.context_channels)
            .init(device);
        let geglu = GegluConfig::new(self.dim, self.dim * 4).init(device);
        let proj_out = scaled_conv2d(
            Conv2dConfig::new([self.dim * 4, self.dim], [1, 1]).init(device),
            1.0,
        );

        BasicTransformerBlock {
            attn_self,
            attn_cross,
            geglu,
            proj_out,
        }
    }
}

/// Self-attention, cross-attention, and a gated feed-forward, each with a
/// residual connection.
#[derive(Module, Debug)]
pub struct BasicTransformerBlock<B: Backend> {
    attn_self: AttentionBlock<B>,
    attn_cross: CrossAttentionBlock<B>,
    geglu: Geglu<B>,
    proj_out: Conv2d<B>,
}

impl<B: Backend> BasicTransformerBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>, context: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let x = self.attn_self.forward(x.clone()) + x;
        let x = self.attn_cross.forward(x.clone(), context) + x;
        self.proj_out.forward(self.geglu.forward(x.clone())) + x
    }
}

/// Configuration for the `ContextRescaler` module.
#[derive(Config, Debug)]
pub struct ContextRescalerConfig {
    /// Number of context channels.
    pub channels: usize,
}

impl ContextRescalerConfig {
    /// Initializes a new `ContextRescaler` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ContextRescaler<B> {
        let proj_out = scaled_conv2d(
            Conv2dConfig::new([self.channels, self.channels], [1, 1]).init(device),
            1.0,
        );

        ContextRescaler {
            proj_out,
            target: Ignored(OnceLock::new()),
        }
    }
}

/// Bilinear-resize adapter that brings a context map to a fixed spatial
/// shape before a 1x1 projection.
///
/// The target shape is frozen by the first forward call and reused for
/// every call after it, so a rescaler instance is specialized to the first
/// query shape it ever sees. Feeding query maps of a different size later
/// resizes the context to the stale frozen shape; don't share one instance
/// across resolutions.
#[derive(Module, Debug)]
pub struct ContextRescaler<B: Backend> {
    proj_out: Conv2d<B>,
    target: Ignored<OnceLock<[usize; 2]>>,
}

impl<B: Backend> ContextRescaler<B> {
    /// Resamples `context` to the frozen target shape, freezing `target`
    /// on the first call.
    pub fn forward(&self, context: Tensor<B, 4>, target: [usize; 2]) -> Tensor<B, 4> {
        let [height, width] = *self.target.get_or_init(|| target);

        let context = interpolate(
            context,
            [height, width],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        );
        self.proj_out.forward(context)
    }

    /// The frozen target shape, if the rescaler has been called yet.
    pub fn frozen_target(&self) -> Option<[usize; 2]> {
        self.target.get().copied()
    }
}

/// Configuration for the `SpatialTransformer` module.
#[derive(Config, Debug)]
pub struct SpatialTransformerConfig {
    /// Channel width of the transformer stage.
    pub channels: usize,
    /// Number of context channels. Defaults to `channels`, which is also
    /// what the self-context fallback requires.
    #[config(default = "None")]
    pub context_channels: Option<usize>,
    /// Number of stacked transformer blocks.
    #[config(default = "1")]
    pub depth: usize,
}

impl SpatialTransformerConfig {
    /// Initializes a new `SpatialTransformer` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SpatialTransformer<B> {
        let context_channels = self.context_channels.unwrap_or(self.channels);

        let norm = GroupNormConfig::new(16, self.channels)
            .with_epsilon(GROUP_NORM_EPSILON)
            .init(device);
        let proj_in = scaled_conv2d(
            Conv2dConfig::new([self.channels, self.channels], [1, 1]).init(device),
            1.0,
        );
        let scaler = ContextRescalerConfig::new(context_channels).init(device);
        let blocks = (0..self.depth)
            .map(|_| {
                BasicTransformerBlockConfig::new(self.channels)
                    .with_context_channels(Some(context_channels))
                    .init(device)
            })
            .collect();
        let proj_out = scaled_conv2d(
            Conv2dConfig::new([self.channels, self.channels], [1, 1]).init(device),
            1.0,
        );

        SpatialTransformer {
            norm,
            proj_in,
            scaler,
            blocks,
            proj_out,
        }
    }
}

/// Transformer stage over a spatial feature map.
///
/// Normalizes and projects the input, rescales the context to the input's
/// own spatial shape, runs the block stack, and projects back with a
/// residual around the whole stage. Without a context the raw input is
/// used as its own context, so cross-attention degenerates to
/// self-attention.
#[derive(Module, Debug)]
pub struct SpatialTransformer<B: Backend> {
    norm: GroupNorm<B>,
    proj_in: Conv2d<B>,
    scaler: ContextRescaler<B>,
    blocks: Vec<BasicTransformerBlock<B>>,
    proj_out: Conv2d<B>,
}

impl<B: Backend> SpatialTransformer<B> {
    pub fn forward(&self, x: Tensor<B, 4>, context: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        let context = self
            .scaler
            .forward(context.unwrap_or_else(|| x.clone()), [height, width]);

        let x_in = x.clone();
        let x = self.norm.forward(x);
        let mut x = self.proj_in.forward(x);
        for block in &self.blocks {
            x = block.forward(x, Some(context.clone()));
        }

        self.proj_out.forward(x) + x_in
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn geglu_halves_projection_channels() {
        let device = Default::default();
        let geglu = GegluConfig::new(8, 16).init::<TestBackend>(&device);

        let x = Tensor::random([1, 8, 4, 4], Distribution::Default, &device);
        let y = geglu.forward(x);
        assert_eq!(y.dims(), [1, 16, 4, 4]);
    }

    #[test]
    fn transformer_block_preserves_shape() {
        let device = Default::default();
        let block = BasicTransformerBlockConfig::new(32).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::random([1, 32, 4, 4], Distribution::Default, &device);
        let ctx = Tensor::<TestBackend, 4>::random([1, 32, 4, 4], Distribution::Default, &device);
        let y = block.forward(x, Some(ctx));
        assert_eq!(y.dims(), [1, 32, 4, 4]);
    }

    #[test]
    fn rescaler_freezes_target_from_first_call() {
        let device = Default::default();
        let scaler = ContextRescalerConfig::new(4).init::<TestBackend>(&device);

        let ctx = Tensor::<TestBackend, 4>::random([1, 4, 16, 16], Distribution::Default, &device);
        let first = scaler.forward(ctx.clone(), [8, 8]);
        assert_eq!(first.dims(), [1, 4, 8, 8]);
        assert_eq!(scaler.frozen_target(), Some([8, 8]));

        // A different requested target is ignored once the shape is frozen.
        let second = scaler.forward(ctx, [4, 4]);
        assert_eq!(second.dims(), [1, 4, 8, 8]);
    }

    #[test]
    fn spatial_transformer_self_context_roundtrip() {
        let device = Default::default();
        let st = SpatialTransformerConfig::new(32).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::random([1, 32, 8, 8], Distribution::Default, &device);
        let y = st.forward(x, None);
        assert_eq!(y.dims(), [1, 32, 8, 8]);
    }

    #[test]
    fn spatial_transformer_rescales_external_context() {
        let device = Default::default();
        let st = SpatialTransformerConfig::new(32).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::random([1, 32, 8, 8], Distribution::Default, &device);
        let ctx = Tensor::<TestBackend, 4>::random([1, 32, 16, 16], Distribution::Default, &device);
        let y = st.forward(x, Some(ctx));
        assert_eq!(y.dims(), [1, 32, 8, 8]);
    }
}
