//! Parameter initialisation.
//!
//! Samples are drawn on the host from a caller supplied [`StdRng`] so a fixed
//! seed reproduces the same parameters on every device. Matrices use
//! Xavier/Glorot uniform; vectors (biases, norm scale/shift) use constants.

use candle_core::{DType, Device, Result, Tensor, Var};
use rand::{rngs::StdRng, Rng};

use crate::checks;

/// Supported initialisation policies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamInit {
    /// Uniform in `[-b, b]` with `b = sqrt(6 / (fan_in + fan_out))`.
    XavierUniform,
    /// All zeros.
    Zeros,
    /// All ones.
    Ones,
}

impl ParamInit {
    /// Samples a tensor with the requested `dims`.
    ///
    /// For rank 2 shapes `(rows, cols)` the fan-out is `rows` and the fan-in
    /// is `cols`, matching the `(out_dim, in_dim)` weight layout.
    pub fn sample(
        &self,
        dims: &[usize],
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Tensor> {
        checks::ensure_float("init", dtype)?;
        let count: usize = dims.iter().product();
        let values = match self {
            ParamInit::XavierUniform => {
                let bound = xavier_bound(dims) as f32;
                (0..count)
                    .map(|_| rng.gen_range(-bound..=bound))
                    .collect::<Vec<f32>>()
            }
            ParamInit::Zeros => vec![0f32; count],
            ParamInit::Ones => vec![1f32; count],
        };
        let tensor = Tensor::from_vec(values, dims, device)?;
        if dtype == DType::F32 {
            Ok(tensor)
        } else {
            tensor.to_dtype(dtype)
        }
    }

    /// Samples straight into a trainable variable.
    pub fn sample_var(
        &self,
        dims: &[usize],
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Var> {
        let tensor = self.sample(dims, rng, device, dtype)?;
        Var::from_tensor(&tensor)
    }
}

/// Glorot bound for a shape; fans follow the PyTorch convention for
/// higher-rank tensors (receptive field folded into both fans).
pub fn xavier_bound(dims: &[usize]) -> f64 {
    let (fan_in, fan_out) = match dims {
        [] => (1, 1),
        [n] => (*n, *n),
        [rows, cols, rest @ ..] => {
            let receptive: usize = rest.iter().product();
            (cols * receptive, rows * receptive)
        }
    };
    (6.0f64 / (fan_in + fan_out).max(1) as f64).sqrt()
}
