//! Lightweight validation helpers shared across layer components.
//!
//! Each helper takes a `context` label (e.g. `"linear.weight"`) that prefixes
//! the error message, and returns `candle_core::Result<()>` so call sites can
//! propagate with `?` instead of panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual] if *actual == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(context: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Checks two tensors share a dtype.
pub fn expect_same_dtype(
    context: &str,
    tensor: &Tensor,
    other_context: &str,
    other: &Tensor,
) -> Result<()> {
    if tensor.dtype() == other.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context} dtype {:?} does not match {other_context} dtype {:?}",
            tensor.dtype(),
            other.dtype()
        )))
    }
}

/// Floating point dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: [DType; 3] = [DType::F16, DType::BF16, DType::F32];

/// Rejects casts between float and non-float dtypes that would silently truncate.
pub fn ensure_float(context: &str, dtype: DType) -> Result<()> {
    if dtype.is_float() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected a floating point dtype, got {dtype:?}"
        )))
    }
}
