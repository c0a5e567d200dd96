//! Variance-scaling weight initialization.
//!
//! Every convolution and dense layer in the network draws its kernel from
//! a variance-scaling distribution in fan-average mode with a
//! truncated-normal draw. Output projections are built with `scale = 0`
//! (floored to [`KERNEL_INIT_MIN_SCALE`]) so residual branches start as a
//! near-no-op.

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, ConvTranspose2d},
        Linear,
    },
    prelude::*,
    tensor::Distribution,
};

use crate::config::KERNEL_INIT_MIN_SCALE;

const ERFINV_CENTRAL_RANGE: f32 = 0.7;
const ERFINV_NUM: [f32; 4] = [0.886_226_9, -1.645_349_6, 0.914_624_87, -0.140_543_33];
const ERFINV_DEN: [f32; 4] = [-2.118_377_7, 1.442_710_5, -0.329_097_5, 0.012_229_801];
const ERFINV_NUM_OUTER: [f32; 4] = [-1.970_840_5, -1.624_906_5, 3.429_567_8, 1.641_345_3];
const ERFINV_DEN_OUTER: [f32; 2] = [3.543_889_3, 1.637_067_8];

/// Std of a unit normal truncated to `[-2, 2]`; divides out the variance
/// lost to truncation so the draw matches the requested stddev.
const TRUNC_STD_CORRECTION: f64 = 0.879_625_661_034_239_8;

/// Inverse error function, evaluated elementwise.
///
/// Rational approximations on the central (`|y| <= 0.7`) and outer ranges
/// seed two Newton steps against `erf`, which brings the result to full
/// float accuracy. Inputs are expected to lie strictly inside `(-1, 1)`.
fn erfinv<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
    let y_abs = y.clone().abs();

    // Central range: a rational polynomial in y^2.
    let z = y.clone().powf_scalar(2.0);
    let num = ((z.clone() * ERFINV_NUM[3] + ERFINV_NUM[2]) * z.clone() + ERFINV_NUM[1]) * z.clone()
        + ERFINV_NUM[0];
    let den = ((((z.clone() * ERFINV_DEN[3] + ERFINV_DEN[2]) * z.clone() + ERFINV_DEN[1]) * z.clone()
        + ERFINV_DEN[0])
        * z)
        + 1.0;
    let central = y.clone() * num / den;

    // Outer range: a rational polynomial in sqrt(-ln((1 - |y|) / 2)).
    let z = (y_abs.clone().neg().add_scalar(1.0) / 2.0).log().neg().sqrt();
    let num = ((z.clone() * ERFINV_NUM_OUTER[3] + ERFINV_NUM_OUTER[2]) * z.clone()
        + ERFINV_NUM_OUTER[1])
        * z.clone()
        + ERFINV_NUM_OUTER[0];
    let den = (z.clone() * ERFINV_DEN_OUTER[1] + ERFINV_DEN_OUTER[0]) * z + 1.0;
    let outer = y.clone().sign() * num / den;

    let mut result = central.mask_where(y_abs.greater_elem(ERFINV_CENTRAL_RANGE), outer);

    let two_over_sqrt_pi = 2.0 / std::f32::consts::PI.sqrt();
    for _ in 0..2 {
        let correction = (result.clone().erf() - y.clone())
            / ((result.clone().powf_scalar(2.0).neg()).exp() * two_over_sqrt_pi);
        result = result - correction;
    }
    result
}

/// Fills a tensor with values from a normal distribution with the given
/// `mean` and `std`, truncated to `[a, b]`.
///
/// Samples uniformly in CDF space, maps back through the inverse error
/// function, and clamps to the bounds.
pub fn trunc_normal<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    mean: f64,
    std: f64,
    a: f64,
    b: f64,
) -> Tensor<B, D> {
    fn norm_cdf(x: f64) -> f64 {
        (1. + libm::erf(x / std::f64::consts::SQRT_2)) / 2.
    }

    let l = norm_cdf((a - mean) / std);
    let u = norm_cdf((b - mean) / std);

    let x = x.random_like(Distribution::Uniform(2. * l - 1., 2. * u - 1.));
    let x = erfinv(x);
    let x = x.mul_scalar(std * std::f64::consts::SQRT_2).add_scalar(mean);

    x.clamp(a, b)
}

/// Redraws a weight tensor from a variance-scaling distribution.
///
/// Fan-average mode: `std = sqrt(scale / ((fan_in + fan_out) / 2))`, drawn
/// from a truncated normal on `[-2 std, 2 std]`. The scale is floored at
/// [`KERNEL_INIT_MIN_SCALE`], so `scale = 0` yields a near-zero kernel
/// rather than a degenerate one.
pub fn kernel_init<B: Backend, const D: usize>(
    weight: Tensor<B, D>,
    scale: f64,
    fan_in: usize,
    fan_out: usize,
) -> Tensor<B, D> {
    let scale = scale.max(KERNEL_INIT_MIN_SCALE);
    let fan_avg = (fan_in + fan_out) as f64 / 2.;
    let std = (scale / fan_avg).sqrt() / TRUNC_STD_CORRECTION;
    trunc_normal(weight, 0., std, -2. * std, 2. * std)
}

/// Re-initializes a `Conv2d` with a variance-scaled kernel and a zero bias.
pub fn scaled_conv2d<B: Backend>(mut conv: Conv2d<B>, scale: f64) -> Conv2d<B> {
    let [out_channels, in_channels, kh, kw] = conv.weight.val().dims();
    conv.weight = Param::from_tensor(kernel_init(
        conv.weight.val(),
        scale,
        in_channels * kh * kw,
        out_channels * kh * kw,
    ));
    conv.bias = conv.bias.map(|b| Param::from_tensor(b.val().zeros_like()));
    conv
}

/// Re-initializes a `ConvTranspose2d` with a variance-scaled kernel and a
/// zero bias.
pub fn scaled_conv_transpose2d<B: Backend>(
    mut conv: ConvTranspose2d<B>,
    scale: f64,
) -> ConvTranspose2d<B> {
    let [in_channels, out_channels, kh, kw] = conv.weight.val().dims();
    conv.weight = Param::from_tensor(kernel_init(
        conv.weight.val(),
        scale,
        in_channels * kh * kw,
        out_channels * kh * kw,
    ));
    conv.bias = conv.bias.map(|b| Param::from_tensor(b.val().zeros_like()));
    conv
}

/// Re-initializes a `Linear` with a variance-scaled kernel and a zero bias.
pub fn scaled_linear<B: Backend>(mut linear: Linear<B>, scale: f64) -> Linear<B> {
    let [d_input, d_output] = linear.weight.val().dims();
    linear.weight = Param::from_tensor(kernel_init(
        linear.weight.val(),
        scale,
        d_input,
        d_output,
    ));
    linear.bias = linear.bias.map(|b| Param::from_tensor(b.val().zeros_like()));
    linear
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn trunc_normal_respects_bounds() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::zeros([64, 64], &device);
        let x = trunc_normal(x, 0.0, 1.0, -2.0, 2.0);

        let max = x.clone().max().into_scalar().elem::<f32>();
        let min = x.min().into_scalar().elem::<f32>();
        assert!(max <= 2.0 + 1e-4, "max {max} above upper bound");
        assert!(min >= -2.0 - 1e-4, "min {min} below lower bound");
    }

    #[test]
    fn kernel_init_zero_scale_is_near_zero() {
        let device = Default::default();
        let w = Tensor::<TestBackend, 4>::zeros([16, 16, 3, 3], &device);
        let w = kernel_init(w, 0.0, 16 * 9, 16 * 9);

        let max_abs = w.abs().max().into_scalar().elem::<f32>();
        assert!(max_abs < 1e-4, "zero-scale kernel too large: {max_abs}");
    }

    #[test]
    fn kernel_init_unit_scale_has_spread() {
        let device = Default::default();
        let w = Tensor::<TestBackend, 2>::zeros([256, 256], &device);
        let w = kernel_init(w, 1.0, 256, 256);

        let std = w.var(0).sqrt().mean().into_scalar().elem::<f32>();
        let expected = (1.0f32 / 256.0).sqrt();
        assert!(
            (std - expected).abs() < expected * 0.25,
            "std {std} far from expected {expected}"
        );
    }
}
