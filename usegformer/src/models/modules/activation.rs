//! Activation functions used across the blocks.

use burn::{
    prelude::*,
    tensor::activation::{sigmoid, silu},
};

/// Tanh-approximation GELU.
pub fn gelu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let tanh_res = (x.clone() * (x.clone().powf_scalar(2.0) * 0.044715 + 1.0) * 0.7978845608)
        .tanh();
    x * 0.5 * (tanh_res + 1.0)
}

/// Sigmoid-approximation GELU, `x * sigmoid(1.702 x)`.
///
/// Used as the gating nonlinearity inside [`Geglu`](super::Geglu).
pub fn quick_gelu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone() * sigmoid(x * 1.702)
}

/// Activation applied inside the convolutional blocks.
#[derive(Module, Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub enum Activation {
    /// Swish, the network default.
    #[default]
    Silu,
    Gelu,
    QuickGelu,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Silu => silu(x),
            Self::Gelu => gelu(x),
            Self::QuickGelu => quick_gelu(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn gelu_matches_reference_points() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([-2.0, -1.0, 0.0, 1.0, 2.0], &device);
        let y: Vec<f32> = gelu(x).into_data().to_vec().unwrap();

        let expected = [-0.0454, -0.1588, 0.0, 0.8412, 1.9546];
        for (got, want) in y.iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "gelu mismatch: {got} vs {want}");
        }
    }

    #[test]
    fn quick_gelu_is_odd_shifted() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0], &device);
        let y: Vec<f32> = quick_gelu(x).into_data().to_vec().unwrap();

        assert!(y[0].abs() < 1e-6);
        // 1 * sigmoid(1.702) = 0.8458
        assert!((y[1] - 0.8458).abs() < 1e-3);
    }
}
