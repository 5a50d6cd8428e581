//! Extension points a patch uses to alter a model's behaviour.

use std::sync::Arc;

use candle_core::{Result, Tensor};
use layers::LayerNode;

/// Context handed to a [`SelfAttentionHook`] alongside the projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttentionOptions {
    /// Index of the block issuing the call.
    pub block_index: usize,
    pub n_heads: usize,
    /// Shape of the latent entering the block, `[batch, channels, h, w]`.
    pub original_shape: Vec<usize>,
}

/// Transforms self-attention projections right before the kernel runs.
///
/// Inputs are `[batch, seq, heads * head_dim]`. The returned keys and values
/// may be longer along the sequence axis than the queries.
pub trait SelfAttentionHook: Send + Sync {
    fn apply(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        options: &AttentionOptions,
    ) -> Result<(Tensor, Tensor, Tensor)>;
}

/// A model that can be cloned and rebuilt with a self-attention hook.
///
/// Clones must own their normalisation slots so that swapping a layer in the
/// clone leaves the source model untouched.
pub trait PatchableModel: Clone + LayerNode {
    /// Consumes the model and returns it with `hook` installed on every
    /// self-attention layer.
    fn with_self_attention_hook(self, hook: Arc<dyn SelfAttentionHook>) -> Self;

    fn self_attention_hook(&self) -> Option<&Arc<dyn SelfAttentionHook>>;
}
