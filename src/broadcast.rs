//! Replicates the style elements of a batch across the rest of it.
//!
//! A batch is treated as two equal halves (e.g. unconditional and conditional
//! passes). Element `0` is the style element of the first half and element
//! `batch / 2` the style element of the second.

use candle_core::{Error, Result, Tensor, D};

/// Returns a tensor shaped like `feat` whose first half is filled with
/// `feat[0]` and whose second half is filled with `feat[batch / 2]`.
///
/// With `scale == 1.0` the copies are a plain broadcast. Otherwise every copy
/// except the leading slot of each half (the style element's own position) is
/// multiplied by `scale`.
///
/// The batch size must be even; odd batches fail in the final reshape.
pub fn expand_first(feat: &Tensor, scale: f64) -> Result<Tensor> {
    let dims = feat.dims().to_vec();
    let Some(&batch) = dims.first() else {
        return Err(Error::Msg("expand_first needs a batch axis".into()));
    };
    let half = batch / 2;

    let style = Tensor::stack(&[feat.get(0)?, feat.get(half)?], 0)?.unsqueeze(1)?;
    let mut expanded = vec![2, half];
    expanded.extend_from_slice(&dims[1..]);
    let style = style.broadcast_as(expanded.clone())?;

    let style = if scale == 1.0 {
        style
    } else {
        let mut factors = vec![scale as f32; half];
        if let Some(first) = factors.first_mut() {
            *first = 1.0;
        }
        let mut factor_shape = vec![1; expanded.len()];
        factor_shape[1] = half;
        let factors = Tensor::from_vec(factors, factor_shape, feat.device())?.to_dtype(feat.dtype())?;
        style.broadcast_mul(&factors)?
    };

    style.reshape(dims)
}

/// Appends [`expand_first`] of `feat` onto `feat` along `dim`, doubling it.
pub fn concat_first<A: candle_core::shape::Dim>(feat: &Tensor, dim: A, scale: f64) -> Result<Tensor> {
    let style = expand_first(feat, scale)?;
    Tensor::cat(&[feat, &style], dim)
}

/// [`concat_first`] along the sequence axis (second to last).
pub fn concat_first_seq(feat: &Tensor, scale: f64) -> Result<Tensor> {
    concat_first(feat, D::Minus2, scale)
}
