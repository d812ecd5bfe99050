//! Padding masks that hide pad tokens from attention.

use candle_core::{bail, DType, Device, Result, Tensor};

use super::subsequent_mask;

/// Keep-mask of shape `(batch, 1, seq)` that is `1` wherever `tokens != pad_id`.
///
/// `tokens` must be an integer tensor shaped `(batch, seq)`.
pub fn padding_mask(tokens: &Tensor, pad_id: u32) -> Result<Tensor> {
    let (batch, seq) = token_dims(tokens)?;
    let rows = tokens.to_dtype(DType::I64)?.to_vec2::<i64>()?;
    let pad = i64::from(pad_id);
    let data = rows
        .iter()
        .flat_map(|row| row.iter().map(|&id| u8::from(id != pad)))
        .collect::<Vec<u8>>();
    Tensor::from_vec(data, (batch, 1, seq), tokens.device())
}

/// Keep-mask of shape `(batch, 1, k_len)` keeping the first `key_lengths[b]` keys.
///
/// Lengths larger than `k_len` are clamped.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    k_len: usize,
) -> Result<Tensor> {
    let data = key_lengths
        .iter()
        .flat_map(|&valid| (0..k_len).map(move |k| u8::from(k < valid)))
        .collect::<Vec<u8>>();
    Tensor::from_vec(data, (key_lengths.len(), 1, k_len), device)
}

/// Decoder self-attention mask: padding keep-mask AND subsequent mask.
///
/// Returns `(batch, seq, seq)`.
pub fn target_mask(tokens: &Tensor, pad_id: u32) -> Result<Tensor> {
    let (_, seq) = token_dims(tokens)?;
    let padding = padding_mask(tokens, pad_id)?;
    let causal = subsequent_mask(tokens.device(), seq)?;
    padding.broadcast_mul(&causal)
}

fn token_dims(tokens: &Tensor) -> Result<(usize, usize)> {
    if !tokens.dtype().is_int() {
        bail!("mask tokens expected an integer dtype, got {:?}", tokens.dtype());
    }
    match tokens.dims() {
        &[batch, seq] => Ok((batch, seq)),
        dims => bail!("mask tokens expected shape (batch, seq), got {dims:?}"),
    }
}
