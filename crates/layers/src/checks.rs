//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(name: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(name: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual_hidden] if *actual_hidden == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{name}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Validates the `(batch, channels, *spatial)` convention used by group norms.
/// The batch must be non-empty.
pub fn expect_batch_channels(name: &str, tensor: &Tensor, channels: usize) -> Result<()> {
    match tensor.dims() {
        [0, ..] => Err(Error::Msg(format!(
            "{name}: empty batch in {:?}",
            tensor.dims()
        ))),
        [_, actual, _, ..] if *actual == channels => Ok(()),
        dims => Err(Error::Msg(format!(
            "{name}: expected (batch, {channels}, ...) layout with at least one spatial axis, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(name: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Float dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32];

/// Promotes half-precision tensors to `f32` so statistics accumulate safely.
pub fn promote_for_reduction(tensor: &Tensor) -> Result<Tensor> {
    match tensor.dtype() {
        DType::F16 | DType::BF16 => tensor.to_dtype(DType::F32),
        _ => Ok(tensor.clone()),
    }
}
