//! Causal (subsequent-position) masks.

use candle_core::{Device, Result, Tensor};

/// Keep-mask of shape `(1, q_len, k_len)` hiding future key positions.
///
/// When `k_len > q_len`, queries are aligned with the most recent `q_len`
/// keys so every query also sees the extra prefix.
pub fn build_causal_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let offset = k_len.saturating_sub(q_len);
    let data = (0..q_len)
        .flat_map(|q| (0..k_len).map(move |k| u8::from(k <= q + offset)))
        .collect::<Vec<u8>>();
    Tensor::from_vec(data, (1, q_len, k_len), device)
}

/// Square `(1, size, size)` lower-triangular keep-mask used by decoder self-attention.
pub fn subsequent_mask(device: &Device, size: usize) -> Result<Tensor> {
    build_causal_mask(device, size, size)
}
