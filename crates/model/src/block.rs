use std::fmt;
use std::sync::Arc;

use attention::{scaled_dot_product, Attention, Config as AttentionConfig};
use candle_core::{DType, Device, Error, Module, Result, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};
use layers::{
    checks, GroupNorm, LayerKind, LayerNode, LayerNorm, NormConfig, NormHandle, NormKind,
};

use crate::config::ModelConfig;
use crate::hooks::{AttentionOptions, SelfAttentionHook};

/// Shared kernel handle; blocks never mutate the kernel.
pub type SharedKernel = Arc<dyn Attention + Send + Sync>;

pub(crate) fn build_norm(
    name: &str,
    kind: NormKind,
    features: usize,
    dtype: DType,
    device: &Device,
) -> Result<NormHandle> {
    let config = NormConfig::new(features, kind);
    let weight = Tensor::ones(features, dtype, device)?;
    let bias = Tensor::zeros(features, dtype, device)?;
    let layer: Arc<dyn layers::NormalizationLayer> = match kind {
        NormKind::LayerNorm => Arc::new(LayerNorm::new(weight, bias, config)?),
        NormKind::GroupNorm { groups } => Arc::new(GroupNorm::new(groups, weight, bias, config)?),
    };
    Ok(NormHandle::new(name, layer))
}

/// Group-normalised residual block over `[batch, channels, h, w]` latents.
#[derive(Debug, Clone)]
pub struct ResBlock {
    norm: NormHandle,
}

impl ResBlock {
    pub fn new(cfg: &ModelConfig) -> Result<Self> {
        let norm = build_norm(
            "norm",
            NormKind::GroupNorm {
                groups: cfg.norm_groups,
            },
            cfg.channels,
            cfg.dtype,
            &cfg.device,
        )?;
        Ok(Self { norm })
    }

    pub fn forward(&self, latent: &Tensor) -> Result<Tensor> {
        let activated = candle_nn::ops::silu(&self.norm.forward(latent)?)?;
        latent + activated
    }
}

impl LayerNode for ResBlock {
    fn name(&self) -> &str {
        "res"
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Other
    }

    fn children(&self) -> Vec<&dyn LayerNode> {
        vec![&self.norm as &dyn LayerNode]
    }

    fn children_mut(&mut self) -> Vec<&mut dyn LayerNode> {
        vec![&mut self.norm as &mut dyn LayerNode]
    }
}

/// Multi-head self-attention over `[batch, seq, channels]` tokens.
#[derive(Clone)]
pub struct SelfAttention {
    to_q: Linear,
    to_k: Linear,
    to_v: Linear,
    to_out: Linear,
    heads: usize,
    kernel: SharedKernel,
    kernel_config: AttentionConfig,
}

impl fmt::Debug for SelfAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfAttention")
            .field("heads", &self.heads)
            .field("kernel_config", &self.kernel_config)
            .finish()
    }
}

impl SelfAttention {
    pub fn new(
        cfg: &ModelConfig,
        kernel: SharedKernel,
        kernel_config: AttentionConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let dim = cfg.channels;
        Ok(Self {
            to_q: linear_no_bias(dim, dim, vb.pp("to_q"))?,
            to_k: linear_no_bias(dim, dim, vb.pp("to_k"))?,
            to_v: linear_no_bias(dim, dim, vb.pp("to_v"))?,
            to_out: linear(dim, dim, vb.pp("to_out"))?,
            heads: cfg.n_heads,
            kernel,
            kernel_config,
        })
    }

    pub fn forward(
        &self,
        tokens: &Tensor,
        hook: Option<&dyn SelfAttentionHook>,
        options: &AttentionOptions,
    ) -> Result<Tensor> {
        let q = self.to_q.forward(tokens)?;
        let k = self.to_k.forward(tokens)?;
        let v = self.to_v.forward(tokens)?;

        let (q, k, v) = match hook {
            Some(hook) => hook.apply(&q, &k, &v, options)?,
            None => (q, k, v),
        };

        let attn = scaled_dot_product(
            self.kernel.as_ref(),
            &q,
            &k,
            &v,
            None,
            self.heads,
            &self.kernel_config,
        )
        .map_err(|e| Error::Msg(e.to_string()))?;
        self.to_out.forward(&attn)
    }
}

impl LayerNode for SelfAttention {
    fn name(&self) -> &str {
        "attn1"
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Other
    }

    fn children(&self) -> Vec<&dyn LayerNode> {
        Vec::new()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn LayerNode> {
        Vec::new()
    }
}

/// GELU feed-forward expanding by `ff_ratio`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    fc_in: Linear,
    fc_out: Linear,
}

impl FeedForward {
    pub fn new(cfg: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let inner = cfg.channels * cfg.ff_ratio;
        Ok(Self {
            fc_in: linear(cfg.channels, inner, vb.pp("fc_in"))?,
            fc_out: linear(inner, cfg.channels, vb.pp("fc_out"))?,
        })
    }

    pub fn forward(&self, tokens: &Tensor) -> Result<Tensor> {
        let hidden = self.fc_in.forward(tokens)?.gelu()?;
        self.fc_out.forward(&hidden)
    }
}

impl LayerNode for FeedForward {
    fn name(&self) -> &str {
        "ff"
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Other
    }

    fn children(&self) -> Vec<&dyn LayerNode> {
        Vec::new()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn LayerNode> {
        Vec::new()
    }
}

/// Spatial transformer: flattens the latent into tokens, applies pre-norm
/// self-attention and feed-forward residuals, then restores the layout.
#[derive(Debug, Clone)]
pub struct TransformerBlock {
    norm1: NormHandle,
    attn1: SelfAttention,
    norm2: NormHandle,
    ff: FeedForward,
    channels: usize,
}

impl TransformerBlock {
    pub fn new(
        cfg: &ModelConfig,
        kernel: SharedKernel,
        kernel_config: AttentionConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            norm1: build_norm("norm1", NormKind::LayerNorm, cfg.channels, cfg.dtype, &cfg.device)?,
            attn1: SelfAttention::new(cfg, kernel, kernel_config, vb.pp("attn1"))?,
            norm2: build_norm("norm2", NormKind::LayerNorm, cfg.channels, cfg.dtype, &cfg.device)?,
            ff: FeedForward::new(cfg, vb.pp("ff"))?,
            channels: cfg.channels,
        })
    }

    pub fn forward(
        &self,
        latent: &Tensor,
        hook: Option<&dyn SelfAttentionHook>,
        block_index: usize,
    ) -> Result<Tensor> {
        let (batch, channels, height, width) = latent.dims4()?;
        let tokens = latent.flatten_from(2)?.transpose(1, 2)?.contiguous()?;
        checks::expect_batch_seq_hidden("transformer.tokens", &tokens, self.channels)?;

        let options = AttentionOptions {
            block_index,
            n_heads: self.attn1.heads,
            original_shape: latent.dims().to_vec(),
        };
        let attn = self
            .attn1
            .forward(&self.norm1.forward(&tokens)?, hook, &options)?;
        let tokens = (tokens + attn)?;
        let ff = self.ff.forward(&self.norm2.forward(&tokens)?)?;
        let tokens = (tokens + ff)?;

        tokens
            .transpose(1, 2)?
            .reshape((batch, channels, height, width))
    }
}

impl LayerNode for TransformerBlock {
    fn name(&self) -> &str {
        "transformer"
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Other
    }

    fn children(&self) -> Vec<&dyn LayerNode> {
        vec![
            &self.norm1 as &dyn LayerNode,
            &self.attn1,
            &self.norm2,
            &self.ff,
        ]
    }

    fn children_mut(&mut self) -> Vec<&mut dyn LayerNode> {
        vec![
            &mut self.norm1 as &mut dyn LayerNode,
            &mut self.attn1,
            &mut self.norm2,
            &mut self.ff,
        ]
    }
}

/// One resolution stage: residual block followed by a transformer block.
#[derive(Debug, Clone)]
pub struct DenoiserBlock {
    name: String,
    res: ResBlock,
    transformer: TransformerBlock,
}

impl DenoiserBlock {
    pub fn new(
        index: usize,
        cfg: &ModelConfig,
        kernel: SharedKernel,
        kernel_config: AttentionConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let name = format!("blocks.{index}");
        let vb = vb.pp(&name);
        Ok(Self {
            res: ResBlock::new(cfg)?,
            transformer: TransformerBlock::new(cfg, kernel, kernel_config, vb.pp("transformer"))?,
            name,
        })
    }

    pub fn forward(
        &self,
        latent: &Tensor,
        hook: Option<&dyn SelfAttentionHook>,
        block_index: usize,
    ) -> Result<Tensor> {
        let hidden = self.res.forward(latent)?;
        self.transformer.forward(&hidden, hook, block_index)
    }
}

impl LayerNode for DenoiserBlock {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Other
    }

    fn children(&self) -> Vec<&dyn LayerNode> {
        vec![&self.res as &dyn LayerNode, &self.transformer]
    }

    fn children_mut(&mut self) -> Vec<&mut dyn LayerNode> {
        vec![&mut self.res as &mut dyn LayerNode, &mut self.transformer]
    }
}
