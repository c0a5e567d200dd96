//! Spatial self- and cross-attention over feature maps.
//!
//! Attention runs over the full flattened spatial grid, so cost is
//! quadratic in `H * W`; the blocks are meant for the small feature maps
//! deep in the network.

use burn::{
    nn::{GroupNorm, Linear, LinearConfig},
    prelude::*,
    tensor::activation::softmax,
};

use super::normalize;
use crate::special::scaled_linear;

/// Shared scaled-dot-product attention over flattened spatial positions.
///
/// The query input is group-normalized first; keys and values come from
/// `context` when given and from the raw input otherwise. The attention
/// output is passed through the zero-scaled projection and added to the
/// normalized input, so a freshly initialized block is close to a pure
/// normalization.
#[allow(clippy::too_many_arguments)]
fn spatial_attention<B: Backend>(
    norm: &GroupNorm<B>,
    query: &Linear<B>,
    key: &Linear<B>,
    value: &Linear<B>,
    proj: &Linear<B>,
    units: usize,
    x: Tensor<B, 4>,
    context: Option<Tensor<B, 4>>,
) -> Tensor<B, 4> {
    let [batch, _, height, width] = x.dims();
    let raw = x.clone();
    let x = norm.forward(x);

    // [batch, H*W, channels] sequences, channels last.
    let flatten = |t: Tensor<B, 4>| {
        let [b, c, h, w] = t.dims();
        t.reshape([b, c, h * w]).swap_dims(1, 2)
    };

    let seq = flatten(x.clone());
    let ctx = flatten(context.unwrap_or(raw));

    let scale = (units as f64).powf(-0.5);
    let q = query.forward(seq);
    let k = key.forward(ctx.clone());
    let v = value.forward(ctx);

    // [batch, H*W, H'*W']: softmax over the flattened key positions.
    let attn_score = q.matmul(k.swap_dims(1, 2)) * scale;
    let attn_score = softmax(attn_score, 2);

    let out = attn_score.matmul(v);
    let out = proj.forward(out);
    let out = out.swap_dims(1, 2).reshape([batch, units, height, width]);

    x + out
}

/// Configuration for the `AttentionBlock` module.
#[derive(Config, Debug)]
pub struct AttentionBlockConfig {
    /// Width of the query/key/value projections.
    pub units: usize,
    /// Number of input channels. Defaults to `units`.
    #[config(default = "None")]
    pub in_channels: Option<usize>,
}

impl AttentionBlockConfig {
    /// Initializes a new `AttentionBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> AttentionBlock<B> {
        let in_channels = self.in_channels.unwrap_or(self.units);

        AttentionBlock {
            norm: normalize(in_channels, device),
            query: scaled_linear(LinearConfig::new(in_channels, self.units).init(device), 1.0),
            key: scaled_linear(LinearConfig::new(in_channels, self.units).init(device), 1.0),
            value: scaled_linear(LinearConfig::new(in_channels, self.units).init(device), 1.0),
            proj: scaled_linear(LinearConfig::new(self.units, self.units).init(device), 0.0),
            units: self.units,
        }
    }
}

/// Self-attention over the spatial grid of a feature map.
#[derive(Module, Debug)]
pub struct AttentionBlock<B: Backend> {
    norm: GroupNorm<B>,
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    proj: Linear<B>,
    units: usize,
}

impl<B: Backend> AttentionBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        spatial_attention(
            &self.norm,
            &self.query,
            &self.key,
            &self.value,
            &self.proj,
            self.units,
            x,
            None,
        )
    }
}

/// Configuration for the `CrossAttentionBlock` module.
#[derive(Config, Debug)]
pub struct CrossAttentionBlockConfig {
    /// Width of the query/key/value projections.
    pub units: usize,
    /// Number of query input channels. Defaults to `units`.
    #[config(default = "None")]
    pub in_channels: Option<usize>,
    /// Number of context channels. Defaults to `in_channels`.
    #[config(default = "None")]
    pub context_channels: Option<usize>,
}

impl CrossAttentionBlockConfig {
    /// Initializes a new `CrossAttentionBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> CrossAttentionBlock<B> {
        let in_channels = self.in_channels.unwrap_or(self.units);
        let context_channels = self.context_channels.unwrap_or(in_channels);

        CrossAttentionBlock {
            norm: normalize(in_channels, device),
            query: scaled_linear(LinearConfig::new(in_channels, self.units).init(device), 1.0),
            key: scaled_linear(
                LinearConfig::new(context_channels, self.units).init(device),
                1.0,
            ),
            value: scaled_linear(
                LinearConfig::new(context_channels, self.units).init(device),
                1.0,
            ),
            proj: scaled_linear(LinearConfig::new(self.units, self.units).init(device), 0.0),
            units: self.units,
        }
    }
}

/// Cross-attention over the spatial grid, with keys and values drawn from
/// a secondary context map. Degenerates to self-attention when no context
/// is supplied.
#[derive(Module, Debug)]
pub struct CrossAttentionBlock<B: Backend> {
    norm: GroupNorm<B>,
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    proj: Linear<B>,
    units: usize,
}

impl<B: Backend> CrossAttentionBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>, context: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        spatial_attention(
            &self.norm,
            &self.query,
            &self.key,
            &self.value,
            &self.proj,
            self.units,
            x,
            context,
        )
    }
}
