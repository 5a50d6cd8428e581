//! Public entry point: build a style-aligned copy of a model.

use std::sync::Arc;

use candle_core::Tensor;
use model::PatchableModel;

use crate::config::{validate_scale, PatchConfig, ShareNorm, StyleAlignedArgs};
use crate::errors::Result;
use crate::processor::SharedAttentionProcessor;
use crate::shared_norm::register_shared_norm;

/// Applies shared attention and, optionally, shared normalisation to a model.
#[derive(Debug, Clone, Default)]
pub struct StyleAlignedPatch {
    args: StyleAlignedArgs,
}

impl StyleAlignedPatch {
    pub fn new(args: StyleAlignedArgs) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &StyleAlignedArgs {
        &self.args
    }

    /// Returns a patched clone of `model`; `model` itself is left untouched.
    ///
    /// `scale` must lie in `[0, 1]` and weights the replicated style keys.
    /// Batches fed to the result must have an even size.
    pub fn patch<M: PatchableModel>(
        &self,
        model: &M,
        share_norm: ShareNorm,
        scale: f64,
        style_image: Option<Tensor>,
    ) -> Result<M> {
        validate_scale(scale)?;

        let mut patched = model.clone();
        let registry = register_shared_norm(
            &mut patched,
            share_norm.shares_group_norm(),
            share_norm.shares_layer_norm(),
        )?;
        log::info!(
            "style aligned patch share_norm={share_norm} scale={scale} norms={}",
            registry.len()
        );

        let processor = SharedAttentionProcessor::new(self.args.clone(), scale, style_image);
        Ok(patched.with_self_attention_hook(Arc::new(processor)))
    }

    /// [`StyleAlignedPatch::patch`] driven by a [`PatchConfig`]; the config's
    /// `args` replace this patch's own.
    pub fn apply<M: PatchableModel>(
        model: &M,
        config: &PatchConfig,
        style_image: Option<Tensor>,
    ) -> Result<M> {
        config.validate()?;
        Self::new(config.args.clone()).patch(model, config.share_norm, config.scale, style_image)
    }
}
