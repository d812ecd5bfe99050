//! Reference scaled dot-product attention.

use std::sync::OnceLock;

use candle_core::{DType, Tensor, D};
use candle_nn::ops::softmax;
use layers::{Dropout, PrecisionPolicy};

use crate::core::{Attention, AttentionError, AttentionOutput, Config, ScorePrecision};

/// Computes `softmax(q k^T / sqrt(d_k)) v` with the default [`Config`].
///
/// Returns the attended values and the probability matrix. Masked positions
/// (zeros in `mask`) are filled with `-1e9` before the softmax. `dropout`,
/// when supplied and in training mode, is applied to the probabilities used
/// for the weighted sum.
pub fn scaled_dot_product_attention(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
    dropout: Option<&Dropout>,
) -> Result<(Tensor, Tensor), AttentionError> {
    let output = attend_with(q, k, v, mask, dropout, &Config::default())?;
    Ok((output.context, output.weights))
}

/// Stateful wrapper around the reference kernel owning its dropout layer.
#[derive(Debug)]
pub struct ExactAttention {
    config: Config,
    dropout: Dropout,
    first_call: OnceLock<()>,
}

impl ExactAttention {
    /// Builds the kernel; `seed` drives the dropout mask stream.
    pub fn new(config: Config, seed: u64) -> Result<Self, AttentionError> {
        let dropout = match config.dropout_p {
            Some(p) => Dropout::new(p, seed).map_err(|e| AttentionError::Config(e.to_string()))?,
            None => Dropout::disabled(),
        };
        Ok(Self {
            config,
            dropout,
            first_call: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }
}

impl Default for ExactAttention {
    fn default() -> Self {
        Self {
            config: Config::default(),
            dropout: Dropout::disabled(),
            first_call: OnceLock::new(),
        }
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init precision={:?} dropout={:?} mask_fill={}",
                self.config.precision,
                self.config.dropout_p,
                self.config.mask_fill
            );
        }
        attend_with(q, k, v, mask, Some(&self.dropout), &self.config)
    }
}

fn attend_with(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
    dropout: Option<&Dropout>,
    config: &Config,
) -> Result<AttentionOutput, AttentionError> {
    let dtype = validate_inputs(q, k, v)?;

    let work_dtype = match config.precision {
        ScorePrecision::ForceF32 => DType::F32,
        ScorePrecision::Inherit => dtype,
    };
    let q_work = q.to_dtype(work_dtype)?.contiguous()?;
    let k_work = k.to_dtype(work_dtype)?.contiguous()?;
    let v_work = v.to_dtype(work_dtype)?.contiguous()?;

    let head_dim = q.dim(D::Minus1)?;
    let scale = 1.0 / (head_dim as f64).sqrt();
    let mut scores = (q_work.matmul(&k_work.t()?.contiguous()?)? * scale)?;

    if let Some(mask) = mask {
        scores = apply_keep_mask(&scores, mask, config.mask_fill)?;
    }

    // Max-subtracted softmax; stays finite for large scores.
    let probs = softmax(&scores, D::Minus1)?;

    let attended = match dropout {
        Some(dropout) if dropout.is_active() => {
            dropout.forward(&probs, &PrecisionPolicy::from_parameter_dtype(work_dtype))?
        }
        _ => probs.clone(),
    };

    let context = attended.matmul(&v_work)?.to_dtype(dtype)?;
    Ok(AttentionOutput {
        context,
        weights: probs,
    })
}

fn validate_inputs(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<DType, AttentionError> {
    let device = q.device();
    if !device.same_device(k.device()) || !device.same_device(v.device()) {
        return Err(AttentionError::shape("q, k, v must reside on the same device"));
    }

    let dtype = q.dtype();
    if dtype != k.dtype() || dtype != v.dtype() {
        return Err(AttentionError::shape("q, k, v must share the same dtype"));
    }
    if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16 | DType::F64) {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("{dtype:?}"),
        });
    }

    let (q_dims, k_dims, v_dims) = (q.dims(), k.dims(), v.dims());
    let rank = q_dims.len();
    if rank < 2 || k_dims.len() != rank || v_dims.len() != rank {
        return Err(AttentionError::shape(format!(
            "q, k, v must share a rank >= 2, got {q_dims:?}, {k_dims:?}, {v_dims:?}"
        )));
    }
    let lead = rank - 2;
    if q_dims[..lead] != k_dims[..lead] || q_dims[..lead] != v_dims[..lead] {
        return Err(AttentionError::shape(format!(
            "leading dims differ: q {q_dims:?}, k {k_dims:?}, v {v_dims:?}"
        )));
    }
    if q_dims[rank - 1] != k_dims[rank - 1] {
        return Err(AttentionError::shape(format!(
            "q and k head dims differ: {} vs {}",
            q_dims[rank - 1],
            k_dims[rank - 1]
        )));
    }
    if k_dims[lead] != v_dims[lead] {
        return Err(AttentionError::shape(format!(
            "k and v sequence lengths differ: {} vs {}",
            k_dims[lead], v_dims[lead]
        )));
    }
    Ok(dtype)
}

fn apply_keep_mask(scores: &Tensor, mask: &Tensor, fill: f64) -> Result<Tensor, AttentionError> {
    if !scores.device().same_device(mask.device()) {
        return Err(AttentionError::shape("mask must reside on the same device as q"));
    }
    if mask.rank() > scores.rank() {
        return Err(AttentionError::shape(format!(
            "mask {:?} has more dims than scores {:?}",
            mask.dims(),
            scores.dims()
        )));
    }
    let keep = mask.ne(&mask.zeros_like()?)?;
    let keep = keep
        .broadcast_as(scores.shape())
        .map_err(|_| {
            AttentionError::shape(format!(
                "mask {:?} does not broadcast to scores {:?}",
                mask.dims(),
                scores.dims()
            ))
        })?
        .contiguous()?;
    let filler = Tensor::full(fill as f32, scores.shape(), scores.device())?.to_dtype(scores.dtype())?;
    Ok(keep.where_cond(scores, &filler)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::subsequent_mask;
    use candle_core::{Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| ((i * 13 % 17) as f32) * 0.05 - 0.4).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let k = Tensor::from_vec(data.iter().rev().copied().collect(), (1, 2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 8), device)?;
        Ok((q, k, v))
    }

    fn naive_attention(q: &Tensor, k: &Tensor, v: &Tensor, mask: Option<&Tensor>) -> CandleResult<Tensor> {
        let (batch, heads, q_len, head_dim) = q.dims4()?;
        let k_len = k.dims4()?.2;
        let q_vec = q.flatten_all()?.to_vec1::<f32>()?;
        let k_vec = k.flatten_all()?.to_vec1::<f32>()?;
        let v_vec = v.flatten_all()?.to_vec1::<f32>()?;
        let keep = match mask {
            Some(m) => Some(m.squeeze(0)?.to_vec2::<u8>()?),
            None => None,
        };
        let scale = 1.0 / (head_dim as f32).sqrt();
        let mut output = vec![0f32; batch * heads * q_len * head_dim];

        for bh in 0..batch * heads {
            for qi in 0..q_len {
                let mut row = (0..k_len)
                    .map(|ki| {
                        let dot: f32 = (0..head_dim)
                            .map(|d| q_vec[(bh * q_len + qi) * head_dim + d] * k_vec[(bh * k_len + ki) * head_dim + d])
                            .sum();
                        match &keep {
                            Some(keep) if keep[qi][ki] == 0 => -1e9,
                            _ => dot * scale,
                        }
                    })
                    .collect::<Vec<f32>>();
                let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                row.iter_mut().for_each(|x| *x = (*x - max).exp());
                let denom: f32 = row.iter().sum();
                for d in 0..head_dim {
                    output[(bh * q_len + qi) * head_dim + d] = (0..k_len)
                        .map(|ki| row[ki] / denom * v_vec[(bh * k_len + ki) * head_dim + d])
                        .sum();
                }
            }
        }
        Tensor::from_vec(output, (batch, heads, q_len, head_dim), q.device())
    }

    fn max_diff(a: &Tensor, b: &Tensor) -> CandleResult<f32> {
        a.to_dtype(DType::F32)?
            .sub(&b.to_dtype(DType::F32)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()
    }

    #[test]
    fn matches_naive_reference_with_causal_mask() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = subsequent_mask(&device, 4)?;
        let (context, _) = scaled_dot_product_attention(&q, &k, &v, Some(&mask), None)?;
        let expected = naive_attention(&q, &k, &v, Some(&mask))?;
        assert!(max_diff(&context, &expected)? < 1e-5);
        Ok(())
    }

    #[test]
    fn output_shape_matches_value_and_rows_sum_to_one() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let (context, weights) = scaled_dot_product_attention(&q, &k, &v, None, None)?;
        assert_eq!(context.dims(), v.dims());
        assert_eq!(weights.dims(), &[1, 2, 4, 4]);

        let sums = weights.sum(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn masked_positions_get_zero_weight() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = subsequent_mask(&device, 4)?;
        let (_, weights) = scaled_dot_product_attention(&q, &k, &v, Some(&mask), None)?;
        let rows = weights.flatten_to(2)?.to_vec2::<f32>()?;
        for (idx, row) in rows.iter().enumerate() {
            let query = idx % 4;
            for (key, w) in row.iter().enumerate() {
                if key > query {
                    assert!(*w < 1e-12, "query {query} key {key} weight {w}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn fully_masked_row_stays_finite() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = Tensor::zeros((1, 4, 4), DType::U8, &device)?;
        let (context, weights) = scaled_dot_product_attention(&q, &k, &v, Some(&mask), None)?;
        let values = context.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|x| x.is_finite()));
        let w = weights.flatten_all()?.to_vec1::<f32>()?;
        assert!(w.iter().all(|x| (x - 0.25).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn accepts_float_masks_and_three_dim_inputs() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (2, 3, 4), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 5, 4), &device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 5, 6), &device)?;
        let mask = Tensor::new(&[[[1f32, 1.0, 0.0, 0.0, 0.0]]], &device)?;
        let (context, weights) = scaled_dot_product_attention(&q, &k, &v, Some(&mask), None)?;
        assert_eq!(context.dims(), &[2, 3, 6]);
        let rows = weights.flatten_to(1)?.to_vec2::<f32>()?;
        assert!(rows.iter().all(|row| row[2..].iter().all(|w| *w < 1e-12)));
        Ok(())
    }

    #[test]
    fn mismatched_shapes_error() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let k = Tensor::zeros((1, 2, 5, 8), DType::F32, &device).unwrap();
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let err = scaled_dot_product_attention(&q, &k, &v, None, None).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
    }

    #[test]
    fn mask_that_cannot_broadcast_errors() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let mask = Tensor::ones((1, 3, 4, 4), DType::U8, &device).unwrap();
        let err = ExactAttention::default()
            .attend(&q, &q, &q, Some(&mask))
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
    }

    #[test]
    fn dtype_matrix_stays_close_to_f32() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = subsequent_mask(&device, 4)?;
        let (reference, _) = scaled_dot_product_attention(&q, &k, &v, Some(&mask), None)?;
        for dtype in [DType::BF16, DType::F16] {
            let (out, _) = scaled_dot_product_attention(
                &q.to_dtype(dtype)?,
                &k.to_dtype(dtype)?,
                &v.to_dtype(dtype)?,
                Some(&mask),
                None,
            )?;
            assert_eq!(out.dtype(), dtype);
            let diff = max_diff(&out, &reference)?;
            assert!(diff < 5e-2, "dtype {dtype:?} diverged by {diff}");
        }
        Ok(())
    }

    #[test]
    fn large_scores_remain_finite() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::full(10_000.0f32, (1, 1, 4, 4), &device)?;
        let k = Tensor::full(-10_000.0f32, (1, 1, 4, 4), &device)?;
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device)?;
        let (context, _) = scaled_dot_product_attention(&q, &k, &v, None, None)?;
        let values = context.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|x| x.is_finite()));
        Ok(())
    }

    #[test]
    fn dropout_only_touches_training_mode() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let attention = ExactAttention::new(Config::default().with_dropout(0.5), 3)?;

        attention.set_training(false);
        let first = attention.attend(&q, &k, &v, None)?;
        let second = attention.attend(&q, &k, &v, None)?;
        assert_eq!(max_diff(&first.context, &second.context)?, 0.0);

        attention.set_training(true);
        let dropped = attention.attend(&q, &k, &v, None)?;
        assert!(max_diff(&dropped.context, &first.context)? > 0.0);
        // Inspection weights are the undropped distribution.
        assert!(max_diff(&dropped.weights, &first.weights)? < 1e-6);
        Ok(())
    }

    #[test]
    fn invalid_dropout_probability_is_a_config_error() {
        let err = ExactAttention::new(Config::default().with_dropout(1.5), 0).unwrap_err();
        assert!(matches!(err, AttentionError::Config(_)));
    }
}
