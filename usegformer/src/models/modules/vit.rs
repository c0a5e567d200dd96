//! Vision-Transformer patch encoder.
//!
//! `Patches` cuts an image into non-overlapping square patches,
//! `PatchEncoder` projects them and adds a learned position embedding, and
//! `Vit` runs the encoded sequence through a stack of pre-norm transformer
//! layers followed by an MLP head.

use burn::{
    nn::{
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear,
        LinearConfig, Unfold4d, Unfold4dConfig,
    },
    prelude::*,
    tensor::activation::softmax,
};

use super::gelu;
use crate::config::LAYER_NORM_EPSILON;

/// Configuration for the `Patches` module.
#[derive(Config, Debug)]
pub struct PatchesConfig {
    /// Side length of the square patches.
    pub patch_size: usize,
}

impl PatchesConfig {
    /// Initializes a new `Patches` module.
    pub fn init(&self) -> Patches {
        let unfold = Unfold4dConfig::new([self.patch_size, self.patch_size])
            .with_stride([self.patch_size, self.patch_size])
            .init();

        Patches {
            patch_size: self.patch_size,
            unfold,
        }
    }
}

/// Extracts non-overlapping `patch_size x patch_size` patches.
///
/// Stride equals the patch size and there is no padding, so trailing rows
/// and columns of images whose sides are not multiples of `patch_size` are
/// silently dropped.
#[derive(Module, Debug, Clone)]
pub struct Patches {
    patch_size: usize,
    unfold: Unfold4d,
}

impl Patches {
    /// `[batch, C, H, W] -> [batch, num_patches, patch_size^2 * C]`
    pub fn forward<B: Backend>(&self, images: Tensor<B, 4>) -> Tensor<B, 3> {
        self.unfold.forward(images).swap_dims(1, 2)
    }

    pub const fn patch_size(&self) -> usize {
        self.patch_size
    }
}

/// Configuration for the `PatchEncoder` module.
#[derive(Config, Debug)]
pub struct PatchEncoderConfig {
    /// Length of the patch sequence.
    pub num_patches: usize,
    /// Dimension of a flattened input patch.
    pub patch_dim: usize,
    /// Width the patches are projected to.
    pub projection_dim: usize,
}

impl PatchEncoderConfig {
    /// Initializes a new `PatchEncoder` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> PatchEncoder<B> {
        PatchEncoder {
            projection: LinearConfig::new(self.patch_dim, self.projection_dim).init(device),
            position_embedding: EmbeddingConfig::new(self.num_patches, self.projection_dim)
                .init(device),
            num_patches: self.num_patches,
        }
    }
}

/// Linear patch projection plus a learned absolute position embedding
/// indexed `0..num_patches`.
#[derive(Module, Debug)]
pub struct PatchEncoder<B: Backend> {
    projection: Linear<B>,
    position_embedding: Embedding<B>,
    num_patches: usize,
}

impl<B: Backend> PatchEncoder<B> {
    pub fn forward(&self, patches: Tensor<B, 3>) -> Tensor<B, 3> {
        let device = patches.device();
        let positions = Tensor::<B, 1, Int>::arange(0..self.num_patches as i64, &device)
            .reshape([1, self.num_patches]);
        let embedded = self.position_embedding.forward(positions);

        self.projection.forward(patches) + embedded
    }
}

/// Multi-head self-attention over the patch sequence.
#[derive(Config, Debug)]
struct PatchAttentionConfig {
    projection_dim: usize,
    num_heads: usize,
    #[config(default = "0.1")]
    dropout: f64,
}

impl PatchAttentionConfig {
    fn init<B: Backend>(&self, device: &Device<B>) -> PatchAttention<B> {
        PatchAttention {
            query: LinearConfig::new(self.projection_dim, self.projection_dim).init(device),
            key: LinearConfig::new(self.projection_dim, self.projection_dim).init(device),
            value: LinearConfig::new(self.projection_dim, self.projection_dim).init(device),
            proj: LinearConfig::new(self.projection_dim, self.projection_dim).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            num_heads: self.num_heads,
        }
    }
}

#[derive(Module, Debug)]
struct PatchAttention<B: Backend> {
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    proj: Linear<B>,
    dropout: Dropout,
    num_heads: usize,
}

impl<B: Backend> PatchAttention<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, seq_len, dim] = x.dims();
        let head_dim = dim / self.num_heads;

        let split = |t: Tensor<B, 3>| {
            t.reshape([batch, seq_len, self.num_heads, head_dim])
                .swap_dims(1, 2)
        };

        let q = split(self.query.forward(x.clone()));
        let k = split(self.key.forward(x.clone()));
        let v = split(self.value.forward(x));

        let scale = (head_dim as f64).powf(-0.5);
        let attn = q.matmul(k.swap_dims(2, 3)) * scale;
        let attn = softmax(attn, 3);
        let attn = self.dropout.forward(attn);

        let out = attn
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq_len, dim]);
        self.proj.forward(out)
    }
}

/// Stack of dense layers with tanh-GELU and dropout after each one.
#[derive(Config, Debug)]
pub struct MlpConfig {
    pub in_features: usize,
    pub hidden_units: Vec<usize>,
    #[config(default = "0.1")]
    pub dropout: f64,
}

impl MlpConfig {
    /// Initializes a new `Mlp` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Mlp<B> {
        let mut layers = Vec::with_capacity(self.hidden_units.len());
        let mut in_features = self.in_features;
        for &units in &self.hidden_units {
            layers.push(LinearConfig::new(in_features, units).init(device));
            in_features = units;
        }

        Mlp {
            layers,
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Dense stack used for the transformer feed-forward and the final head.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
    dropout: Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let mut x = x;
        for layer in &self.layers {
            x = self.dropout.forward(gelu(layer.forward(x)));
        }
        x
    }
}

/// One pre-norm transformer encoder layer.
#[derive(Module, Debug)]
struct VitBlock<B: Backend> {
    norm_attn: LayerNorm<B>,
    attention: PatchAttention<B>,
    norm_mlp: LayerNorm<B>,
    mlp: Mlp<B>,
}

impl<B: Backend> VitBlock<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let attn = self.attention.forward(self.norm_attn.forward(x.clone()));
        let x = attn + x;

        let y = self.mlp.forward(self.norm_mlp.forward(x.clone()));
        y + x
    }
}

/// Configuration for the `Vit` module.
#[derive(Config, Debug)]
pub struct VitConfig {
    /// Side length of the square patches.
    pub patch_size: usize,
    /// Length of the patch sequence (`(H / patch_size) * (W / patch_size)`).
    pub num_patches: usize,
    /// Number of input image channels.
    pub channels: usize,
    /// Number of stacked transformer layers.
    pub transformer_layers: usize,
    /// Width of the encoded patch sequence.
    pub projection_dim: usize,
    /// Number of attention heads.
    pub num_heads: usize,
    /// Hidden widths of the per-layer feed-forward stack.
    pub transformer_units: Vec<usize>,
    /// Hidden widths of the final head before halving.
    pub mlp_head_units: Vec<usize>,
}

impl VitConfig {
    /// Initializes a new `Vit` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Vit<B> {
        let patch_dim = self.channels * self.patch_size * self.patch_size;

        let patches = PatchesConfig::new(self.patch_size).init();
        let patch_encoder =
            PatchEncoderConfig::new(self.num_patches, patch_dim, self.projection_dim).init(device);

        let blocks = (0..self.transformer_layers)
            .map(|_| VitBlock {
                norm_attn: LayerNormConfig::new(self.projection_dim)
                    .with_epsilon(LAYER_NORM_EPSILON)
                    .init(device),
                attention: PatchAttentionConfig::new(self.projection_dim, self.num_heads)
                    .init(device),
                norm_mlp: LayerNormConfig::new(self.projection_dim)
                    .with_epsilon(LAYER_NORM_EPSILON)
                    .init(device),
                mlp: MlpConfig::new(self.projection_dim, self.transformer_units.clone())
                    .init(device),
            })
            .collect();

        let norm = LayerNormConfig::new(self.projection_dim)
            .with_epsilon(LAYER_NORM_EPSILON)
            .init(device);
        // The head runs at half the configured widths with heavy dropout.
        let head_units: Vec<usize> = self.mlp_head_units.iter().map(|&u| u / 2).collect();
        let head = MlpConfig::new(self.projection_dim, head_units)
            .with_dropout(0.5)
            .init(device);

        Vit {
            patches,
            patch_encoder,
            blocks,
            norm,
            head,
        }
    }
}

/// Patch-based vision transformer producing a per-patch feature sequence.
#[derive(Module, Debug)]
pub struct Vit<B: Backend> {
    patches: Patches,
    patch_encoder: PatchEncoder<B>,
    blocks: Vec<VitBlock<B>>,
    norm: LayerNorm<B>,
    head: Mlp<B>,
}

impl<B: Backend> Vit<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = self.patches.forward(images);
        let mut x = self.patch_encoder.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.norm.forward(x);
        self.head.forward(x)
    }
}
