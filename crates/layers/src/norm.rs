//! Normalisation layers bundled with unified shape and dtype handling.
//!
//! [`LayerNorm`] expects the `(batch, seq, hidden)` convention and normalises
//! each token along the last axis. [`GroupNorm`] expects `(batch, channels,
//! *spatial)` and normalises each group of channels over every spatial
//! position. Statistics are always accumulated in `f32` and the output is cast
//! back to the input dtype.

use candle_core::{Error, Result, Tensor, D};

use crate::checks;

/// Available normalisation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormKind {
    /// Per-token normalisation over the feature axis.
    LayerNorm,
    /// Normalisation over channel groups and all spatial positions.
    GroupNorm { groups: usize },
}

/// Configuration shared by all normalisation layers.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the feature (layer norm) or channel (group norm) axis.
    pub num_features: usize,
    /// Numeric stabiliser applied to the variance.
    pub epsilon: f64,
    /// Desired variant of the normalisation routine.
    pub kind: NormKind,
    /// Whether post-normalisation affine parameters are present.
    pub elementwise_affine: bool,
}

impl NormConfig {
    /// Creates a configuration using the usual `1e-5` epsilon.
    pub fn new(num_features: usize, kind: NormKind) -> Self {
        Self {
            num_features,
            epsilon: 1e-5,
            kind,
            elementwise_affine: true,
        }
    }
}

/// Shared interface for normalisation layers.
///
/// Implementations must be pure functions of their input so that a wrapper
/// can feed them a widened tensor and slice the result back.
pub trait NormalizationLayer: Send + Sync {
    /// Returns the configuration so callers can check shape compatibility.
    fn config(&self) -> &NormConfig;

    /// Applies the normalisation to an activation tensor.
    fn forward(&self, hidden: &Tensor) -> Result<Tensor>;

    /// Variant of the layer, used for tree-walk dispatch.
    fn kind(&self) -> NormKind {
        self.config().kind
    }
}

#[derive(Debug, Clone)]
struct NormImpl {
    config: NormConfig,
    weight: Option<Tensor>,
    bias: Option<Tensor>,
}

impl NormImpl {
    fn new(config: NormConfig, weight: Option<Tensor>, bias: Option<Tensor>) -> Result<Self> {
        if config.num_features == 0 {
            return Err(Error::Msg("norm.num_features must be non-zero".into()));
        }
        if let NormKind::GroupNorm { groups } = config.kind {
            if groups == 0 || config.num_features % groups != 0 {
                return Err(Error::Msg(format!(
                    "group norm needs channels ({}) divisible by a non-zero group count ({})",
                    config.num_features, groups
                )));
            }
        }
        if config.elementwise_affine {
            if weight.is_none() {
                return Err(Error::Msg(
                    "elementwise affine norms must supply a scale parameter".into(),
                ));
            }
        } else if weight.is_some() || bias.is_some() {
            return Err(Error::Msg(
                "non-affine norms must not include scale or bias parameters".into(),
            ));
        }

        for (name, param) in [("norm.weight", &weight), ("norm.bias", &bias)] {
            if let Some(param) = param {
                checks::expect_shape(name, param, &[config.num_features])?;
                checks::expect_dtype_in(name, param, checks::FLOAT_DTYPES)?;
            }
        }

        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    fn normalize_last_axis(&self, compute: &Tensor) -> Result<Tensor> {
        let mean = compute.mean_keepdim(D::Minus1)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        centered.broadcast_div(&denom)
    }

    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let channels = self.config.num_features;
        let dtype = hidden.dtype();
        let compute = checks::promote_for_reduction(hidden)?;

        let (normalized, param_shape) = match self.config.kind {
            NormKind::LayerNorm => {
                checks::expect_batch_seq_hidden("norm.input", hidden, channels)?;
                (self.normalize_last_axis(&compute)?, vec![channels])
            }
            NormKind::GroupNorm { groups } => {
                checks::expect_batch_channels("norm.input", hidden, channels)?;
                let dims = hidden.dims().to_vec();
                let batch = dims[0];
                let per_group = hidden.elem_count() / (batch * groups);
                let grouped = compute.reshape((batch, groups, per_group))?;
                let normalized = self.normalize_last_axis(&grouped)?.reshape(dims.clone())?;
                let mut param_shape = vec![1; dims.len()];
                param_shape[1] = channels;
                (normalized, param_shape)
            }
        };

        let mut output = normalized;
        if let Some(weight) = &self.weight {
            let weight = weight.to_dtype(output.dtype())?.reshape(param_shape.clone())?;
            output = output.broadcast_mul(&weight)?;
        }
        if let Some(bias) = &self.bias {
            let bias = bias.to_dtype(output.dtype())?.reshape(param_shape)?;
            output = output.broadcast_add(&bias)?;
        }
        output.to_dtype(dtype)
    }
}

/// Standard LayerNorm implementation with optional affine parameters.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    inner: NormImpl,
}

impl LayerNorm {
    /// Constructs a LayerNorm with learnable scale and bias parameters.
    pub fn new(weight: Tensor, bias: Tensor, mut config: NormConfig) -> Result<Self> {
        config.kind = NormKind::LayerNorm;
        config.elementwise_affine = true;
        Ok(Self {
            inner: NormImpl::new(config, Some(weight), Some(bias))?,
        })
    }

    /// Constructs a LayerNorm without affine parameters (scale = 1, bias = 0).
    pub fn without_affine(mut config: NormConfig) -> Result<Self> {
        config.kind = NormKind::LayerNorm;
        config.elementwise_affine = false;
        Ok(Self {
            inner: NormImpl::new(config, None, None)?,
        })
    }
}

impl NormalizationLayer for LayerNorm {
    fn config(&self) -> &NormConfig {
        &self.inner.config
    }

    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        self.inner.forward(hidden)
    }
}

/// GroupNorm over `(batch, channels, *spatial)` activations, as found in
/// convolutional denoiser blocks.
#[derive(Debug, Clone)]
pub struct GroupNorm {
    inner: NormImpl,
}

impl GroupNorm {
    /// Constructs a GroupNorm with per-channel scale and bias.
    pub fn new(groups: usize, weight: Tensor, bias: Tensor, mut config: NormConfig) -> Result<Self> {
        config.kind = NormKind::GroupNorm { groups };
        config.elementwise_affine = true;
        Ok(Self {
            inner: NormImpl::new(config, Some(weight), Some(bias))?,
        })
    }

    /// Constructs a GroupNorm without affine parameters.
    pub fn without_affine(groups: usize, mut config: NormConfig) -> Result<Self> {
        config.kind = NormKind::GroupNorm { groups };
        config.elementwise_affine = false;
        Ok(Self {
            inner: NormImpl::new(config, None, None)?,
        })
    }

    /// Number of channel groups.
    pub fn groups(&self) -> usize {
        match self.inner.config.kind {
            NormKind::GroupNorm { groups } => groups,
            NormKind::LayerNorm => 1,
        }
    }
}

impl NormalizationLayer for GroupNorm {
    fn config(&self) -> &NormConfig {
        &self.inner.config
    }

    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        self.inner.forward(hidden)
    }
}
