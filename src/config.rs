//! Patch configuration: which signals are shared and how strongly.
//!
//! Every record derives `serde` with field defaults so partial documents load,
//! and [`PatchConfig::apply_env_overrides`] layers `STYLE_ALIGNED_*`
//! environment variables on top.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StyleAlignedError};

/// Environment variable overriding [`PatchConfig::share_norm`].
pub const SHARE_NORM_ENV: &str = "STYLE_ALIGNED_SHARE_NORM";
/// Environment variable overriding [`PatchConfig::scale`].
pub const SCALE_ENV: &str = "STYLE_ALIGNED_SCALE";

/// Which signals the attention processor shares across the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleAlignedArgs {
    /// Concatenate the style element's keys and values onto every element's.
    pub share_attention: bool,
    pub adain_queries: bool,
    pub adain_keys: bool,
    pub adain_values: bool,
    /// Carried for configuration compatibility; not read by the processor.
    pub shared_score_shift: f64,
    /// Carried for configuration compatibility; not read by the processor.
    pub only_self_level: f64,
}

impl Default for StyleAlignedArgs {
    fn default() -> Self {
        Self {
            share_attention: true,
            adain_queries: true,
            adain_keys: true,
            adain_values: false,
            shared_score_shift: 0.0,
            only_self_level: 0.0,
        }
    }
}

/// Which normalisation layers get widened with the style element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareNorm {
    #[default]
    Disabled,
    Group,
    Layer,
    Both,
}

impl ShareNorm {
    pub fn shares_group_norm(self) -> bool {
        matches!(self, ShareNorm::Group | ShareNorm::Both)
    }

    pub fn shares_layer_norm(self) -> bool {
        matches!(self, ShareNorm::Layer | ShareNorm::Both)
    }
}

impl FromStr for ShareNorm {
    type Err = StyleAlignedError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(ShareNorm::Disabled),
            "group" => Ok(ShareNorm::Group),
            "layer" => Ok(ShareNorm::Layer),
            "both" => Ok(ShareNorm::Both),
            _ => Err(StyleAlignedError::UnknownShareNorm(value.to_string())),
        }
    }
}

impl fmt::Display for ShareNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShareNorm::Disabled => "disabled",
            ShareNorm::Group => "group",
            ShareNorm::Layer => "layer",
            ShareNorm::Both => "both",
        })
    }
}

/// Full set of patch inputs apart from the model and style image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub share_norm: ShareNorm,
    /// Multiplier applied to the replicated style keys, in `[0, 1]`.
    pub scale: f64,
    pub args: StyleAlignedArgs,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            share_norm: ShareNorm::Disabled,
            scale: 1.0,
            args: StyleAlignedArgs::default(),
        }
    }
}

impl PatchConfig {
    pub fn validate(&self) -> Result<()> {
        validate_scale(self.scale)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup, then validates.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(SHARE_NORM_ENV) {
            self.share_norm = raw.parse()?;
        }
        if let Some(raw) = lookup(SCALE_ENV) {
            self.scale = raw
                .trim()
                .parse()
                .map_err(|_| StyleAlignedError::UnparsableScale(raw.clone()))?;
        }
        self.validate()
    }
}

pub(crate) fn validate_scale(scale: f64) -> Result<()> {
    if (0.0..=1.0).contains(&scale) {
        Ok(())
    } else {
        Err(StyleAlignedError::InvalidScale(scale))
    }
}
