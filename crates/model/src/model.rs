use std::fmt;
use std::sync::Arc;

use attention::{Config as AttentionConfig, ExactAttention};
use candle_core::{Error, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use layers::{LayerKind, LayerNode, NormHandle, NormKind};

use crate::{
    block::{build_norm, DenoiserBlock, SharedKernel},
    config::ModelConfig,
    hooks::{PatchableModel, SelfAttentionHook},
};

/// Latent denoiser assembled from residual and transformer blocks.
///
/// Cloning is cheap: parameters are shared, while normalisation slots and the
/// attention hook are owned per clone.
#[derive(Clone)]
pub struct Denoiser {
    config: ModelConfig,
    blocks: Vec<DenoiserBlock>,
    out_norm: NormHandle,
    attention_hook: Option<Arc<dyn SelfAttentionHook>>,
}

impl fmt::Debug for Denoiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Denoiser")
            .field("channels", &self.config.channels)
            .field("blocks", &self.blocks.len())
            .field("attention_hook", &self.attention_hook.is_some())
            .finish()
    }
}

impl Denoiser {
    /// Builds the model with freshly initialised parameters and the reference
    /// attention kernel.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let kernel: SharedKernel = Arc::new(ExactAttention::new());
        Self::with_kernel(config, kernel, AttentionConfig::from_env())
    }

    /// Builds the model around a caller-supplied attention kernel.
    pub fn with_kernel(
        config: ModelConfig,
        kernel: SharedKernel,
        kernel_config: AttentionConfig,
    ) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, config.dtype, &config.device);

        let mut blocks = Vec::with_capacity(config.n_blocks);
        for index in 0..config.n_blocks {
            blocks.push(DenoiserBlock::new(
                index,
                &config,
                Arc::clone(&kernel),
                kernel_config.clone(),
                vb.clone(),
            )?);
        }

        let out_norm = build_norm(
            "out_norm",
            NormKind::GroupNorm {
                groups: config.norm_groups,
            },
            config.channels,
            config.dtype,
            &config.device,
        )?;

        log::debug!(
            "denoiser init blocks={} channels={} heads={} groups={}",
            config.n_blocks,
            config.channels,
            config.n_heads,
            config.norm_groups
        );

        Ok(Self {
            config,
            blocks,
            out_norm,
            attention_hook: None,
        })
    }

    /// Returns the model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Runs every block over a `[batch, channels, h, w]` latent.
    pub fn forward(&self, latent: &Tensor) -> Result<Tensor> {
        let (_, channels, _, _) = latent.dims4()?;
        if channels != self.config.channels {
            return Err(Error::Msg(format!(
                "latent expected {} channels, got {:?}",
                self.config.channels,
                latent.dims()
            )));
        }
        let latent = latent.to_dtype(self.config.dtype)?;

        let hook = self.attention_hook.as_deref();
        let mut hidden = latent;
        for (index, block) in self.blocks.iter().enumerate() {
            hidden = block.forward(&hidden, hook, index)?;
        }
        self.out_norm.forward(&hidden)
    }
}

impl LayerNode for Denoiser {
    fn name(&self) -> &str {
        "denoiser"
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Other
    }

    fn children(&self) -> Vec<&dyn LayerNode> {
        let mut children: Vec<&dyn LayerNode> = self
            .blocks
            .iter()
            .map(|block| block as &dyn LayerNode)
            .collect();
        children.push(&self.out_norm);
        children
    }

    fn children_mut(&mut self) -> Vec<&mut dyn LayerNode> {
        let mut children: Vec<&mut dyn LayerNode> = self
            .blocks
            .iter_mut()
            .map(|block| block as &mut dyn LayerNode)
            .collect();
        children.push(&mut self.out_norm);
        children
    }
}

impl PatchableModel for Denoiser {
    fn with_self_attention_hook(mut self, hook: Arc<dyn SelfAttentionHook>) -> Self {
        self.attention_hook = Some(hook);
        self
    }

    fn self_attention_hook(&self) -> Option<&Arc<dyn SelfAttentionHook>> {
        self.attention_hook.as_ref()
    }
}
