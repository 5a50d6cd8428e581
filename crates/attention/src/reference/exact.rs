//! Reference CPU-friendly multi-head attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait. Queries and
//! keys may have different sequence lengths; no causal structure is imposed.

use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;

use crate::core::{Attention, AttentionError, Config, PrecisionPolicy};
use crate::masks::MASK_DTYPE;

/// Numerically stable, portable attention kernel.
#[derive(Debug, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

struct Dims {
    batch: usize,
    q_len: usize,
    k_len: usize,
    hidden: usize,
    head_dim: usize,
}

impl ExactAttention {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(q: &Tensor, k: &Tensor, v: &Tensor, heads: usize) -> Result<Dims, AttentionError> {
        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must reside on the same device".to_string(),
            });
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must share the same dtype".to_string(),
            });
        }
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, q_len, hidden) = q.dims3().map_err(|_| AttentionError::InvalidShape {
            context: "q must have shape [batch, seq_len, hidden]".to_string(),
        })?;
        let (kb, k_len, kh) = k.dims3().map_err(|_| AttentionError::InvalidShape {
            context: "k must have shape [batch, seq_len, hidden]".to_string(),
        })?;
        let (vb, vk, vh) = v.dims3().map_err(|_| AttentionError::InvalidShape {
            context: "v must have shape [batch, seq_len, hidden]".to_string(),
        })?;

        if kb != batch || kh != hidden {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "k shape mismatch: expected [{batch}, ?, {hidden}] got [{kb}, {k_len}, {kh}]"
                ),
            });
        }
        if vb != batch || vk != k_len || vh != hidden {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "v shape mismatch: expected [{batch}, {k_len}, {hidden}] got [{vb}, {vk}, {vh}]"
                ),
            });
        }
        if heads == 0 || hidden % heads != 0 {
            return Err(AttentionError::InvalidShape {
                context: format!("hidden size {hidden} is not divisible into {heads} heads"),
            });
        }

        Ok(Dims {
            batch,
            q_len,
            k_len,
            hidden,
            head_dim: hidden / heads,
        })
    }

    fn run(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        heads: usize,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init precision={:?} heads={} dtype={:?}",
                config.precision,
                heads,
                q.dtype()
            );
        }

        let dims = Self::validate(q, k, v, heads)?;
        let work_dtype = match config.precision {
            PrecisionPolicy::ForceF32 => DType::F32,
            PrecisionPolicy::Inherit => q.dtype(),
        };

        let split = |t: &Tensor, len: usize| -> candle_core::Result<Tensor> {
            t.to_dtype(work_dtype)?
                .reshape((dims.batch, len, heads, dims.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q_heads = split(q, dims.q_len)?;
        let k_heads = split(k, dims.k_len)?;
        let v_heads = split(v, dims.k_len)?;

        let scale = 1.0 / (dims.head_dim as f64).sqrt();
        let k_t = k_heads.t()?.contiguous()?;
        let mut scores = (q_heads.matmul(&k_t)? * scale)?;

        if let Some(mask) = mask {
            // A zero-element mask constrains nothing.
            if mask.elem_count() > 0 {
                if mask.dtype() != MASK_DTYPE {
                    return Err(AttentionError::UnsupportedDType {
                        requested: format!(
                            "mask expects dtype {MASK_DTYPE:?}, got {:?}",
                            mask.dtype()
                        ),
                    });
                }
                let mask = mask.to_dtype(work_dtype)?;
                scores = scores
                    .broadcast_add(&mask)
                    .map_err(|_| AttentionError::InvalidShape {
                        context: format!(
                            "mask {:?} does not broadcast to [{}, {heads}, {}, {}]",
                            mask.dims(),
                            dims.batch,
                            dims.q_len,
                            dims.k_len
                        ),
                    })?;
            }
        }

        let probs = softmax_last_dim(&scores)?;
        let output = probs
            .matmul(&v_heads)?
            .transpose(1, 2)?
            .reshape((dims.batch, dims.q_len, dims.hidden))?;
        Ok(output.to_dtype(q.dtype())?)
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        heads: usize,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        self.run(q, k, v, heads, None, config)
    }

    fn attend_masked(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        heads: usize,
        mask: &Tensor,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        self.run(q, k, v, heads, Some(mask), config)
    }
}
