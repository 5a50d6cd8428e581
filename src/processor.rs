//! Per-call transform of self-attention projections.

use candle_core::{Result, Tensor};
use model::{AttentionOptions, SelfAttentionHook};

use crate::broadcast::concat_first_seq;
use crate::config::StyleAlignedArgs;
use crate::stats::adain;

/// Restyles queries/keys/values towards the style elements and lets every
/// batch element attend to the style element's keys and values.
///
/// Stateless across calls; the same instance serves every attention layer.
#[derive(Debug, Clone)]
pub struct SharedAttentionProcessor {
    args: StyleAlignedArgs,
    scale: f64,
    style_image: Option<Tensor>,
}

impl SharedAttentionProcessor {
    pub fn new(args: StyleAlignedArgs, scale: f64, style_image: Option<Tensor>) -> Self {
        Self {
            args,
            scale,
            style_image,
        }
    }

    pub fn args(&self) -> &StyleAlignedArgs {
        &self.args
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Reference image supplied at patch time. Held for callers; the batch's
    /// own style elements drive the transform.
    pub fn style_image(&self) -> Option<&Tensor> {
        self.style_image.as_ref()
    }

    /// Transforms `[batch, seq, hidden]` projections. The returned keys and
    /// values are twice as long along `seq` when attention sharing is on.
    pub fn process(&self, q: &Tensor, k: &Tensor, v: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let mut q = q.clone();
        let mut k = k.clone();
        let mut v = v.clone();

        if self.args.adain_queries {
            q = adain(&q)?;
        }
        if self.args.adain_keys {
            k = adain(&k)?;
        }
        if self.args.adain_values {
            v = adain(&v)?;
        }
        if self.args.share_attention {
            k = concat_first_seq(&k, self.scale)?;
            v = concat_first_seq(&v, 1.0)?;
        }
        Ok((q, k, v))
    }
}

impl SelfAttentionHook for SharedAttentionProcessor {
    fn apply(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        options: &AttentionOptions,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        log::trace!(
            "shared attention block={} q={:?} k={:?}",
            options.block_index,
            q.dims(),
            k.dims()
        );
        self.process(q, k, v)
    }
}
