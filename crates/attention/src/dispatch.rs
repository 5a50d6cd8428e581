//! Mask-aware routing between the unmasked and masked kernel variants.

use candle_core::Tensor;

use crate::core::{Attention, AttentionError, Config};

/// Runs `kernel` on `q`, `k`, `v`, choosing the masked variant whenever a mask
/// is supplied.
///
/// Only absence selects the unmasked path: a present mask with zero elements
/// still goes to [`Attention::attend_masked`].
pub fn scaled_dot_product(
    kernel: &dyn Attention,
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
    heads: usize,
    config: &Config,
) -> Result<Tensor, AttentionError> {
    match mask {
        Some(mask) => kernel.attend_masked(q, k, v, heads, mask, config),
        None => kernel.attend(q, k, v, heads, config),
    }
}
