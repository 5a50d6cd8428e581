//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout `[batch, seq_len, hidden]`
//! where `hidden = heads * head_dim`. `k` and `v` share a sequence length that
//! may differ from the query's. The output mirrors the layout and dtype of `q`.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{Config, PrecisionPolicy};
pub use errors::AttentionError;

/// Unified interface for multi-head attention kernels.
///
/// * `q` is `[batch, q_len, hidden]`, `k` and `v` are `[batch, k_len, hidden]`.
/// * `hidden` must be divisible by `heads`.
/// * Masks are additive and must broadcast to `[batch, heads, q_len, k_len]`.
pub trait Attention {
    /// Plain multi-head attention.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        heads: usize,
        config: &Config,
    ) -> Result<Tensor, AttentionError>;

    /// Multi-head attention with an additive mask applied to the scores.
    fn attend_masked(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        heads: usize,
        mask: &Tensor,
        config: &Config,
    ) -> Result<Tensor, AttentionError>;
}
