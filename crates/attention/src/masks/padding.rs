//! Builders for padding masks used to drop padded keys.
//!
//! The denoiser's self-attention runs unmasked; these builders feed
//! [`Attention::attend_masked`](crate::core::Attention::attend_masked) for
//! callers with padded key sequences and in the kernel's tests.
//!
//! All padding masks share the dtype and layout described in
//! [`super::MASK_DTYPE`](super::MASK_DTYPE).

use candle_core::{Device, Error, Result, Tensor};

/// Construct padding masks from per-batch valid key lengths.
///
/// Keys at positions `>= key_lengths[b]` are discarded for every query of
/// batch element `b`.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let batch = key_lengths.len();
    let mut data = vec![0f32; batch * q_len * k_len];

    for (b, &valid) in key_lengths.iter().enumerate() {
        let valid = valid.min(k_len);
        for q in 0..q_len {
            let row_start = (b * q_len + q) * k_len;
            data[row_start + valid..row_start + k_len].fill(f32::NEG_INFINITY);
        }
    }

    Tensor::from_vec(data, (batch, 1, q_len, k_len), device)
}

/// Construct padding masks from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and must share the same
/// length. `true` indicates a padded (masked) key position.
pub fn padding_mask_from_booleans(
    device: &Device,
    padding: &[Vec<bool>],
    q_len: usize,
) -> Result<Tensor> {
    let k_len = padding.first().map(Vec::len).unwrap_or(0);
    if padding.iter().any(|mask| mask.len() != k_len) {
        return Err(Error::Msg(
            "all boolean padding masks must share k_len".into(),
        ));
    }

    let batch = padding.len();
    let mut data = vec![0f32; batch * q_len * k_len];

    for (b, mask) in padding.iter().enumerate() {
        for q in 0..q_len {
            let row_start = (b * q_len + q) * k_len;
            for (k, &is_padding) in mask.iter().enumerate() {
                if is_padding {
                    data[row_start + k] = f32::NEG_INFINITY;
                }
            }
        }
    }

    Tensor::from_vec(data, (batch, 1, q_len, k_len), device)
}
