use candle_core::{DType, Device, Error, Result};

/// High-level configuration for assembling the denoiser.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub channels: usize,
    pub n_blocks: usize,
    pub n_heads: usize,
    pub head_dim: usize,
    pub norm_groups: usize,
    pub ff_ratio: usize,
    pub dtype: DType,
    pub device: Device,
}

impl ModelConfig {
    /// Validate structural invariants the blocks rely on.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::Msg("channels must be greater than zero".into()));
        }
        if self.n_blocks == 0 {
            return Err(Error::Msg("n_blocks must be greater than zero".into()));
        }
        if self.n_heads == 0 {
            return Err(Error::Msg("n_heads must be greater than zero".into()));
        }
        if self.head_dim == 0 {
            return Err(Error::Msg("head_dim must be greater than zero".into()));
        }
        if self.n_heads * self.head_dim != self.channels {
            return Err(Error::Msg(format!(
                "channels ({}) must equal n_heads ({}) * head_dim ({})",
                self.channels, self.n_heads, self.head_dim
            )));
        }
        if self.norm_groups == 0 || self.channels % self.norm_groups != 0 {
            return Err(Error::Msg(format!(
                "channels ({}) must be divisible by norm_groups ({})",
                self.channels, self.norm_groups
            )));
        }
        if self.ff_ratio == 0 {
            return Err(Error::Msg("ff_ratio must be positive".into()));
        }
        if !matches!(self.dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(Error::Msg(format!(
                "unsupported parameter dtype {:?}",
                self.dtype
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ModelConfig {
        ModelConfig {
            channels: 8,
            n_blocks: 1,
            n_heads: 2,
            head_dim: 4,
            norm_groups: 4,
            ff_ratio: 2,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    #[test]
    fn validate_rejects_inconsistent_heads_and_groups() {
        assert!(base().validate().is_ok());

        let mut heads = base();
        heads.head_dim = 3;
        assert!(heads.validate().is_err());

        let mut groups = base();
        groups.norm_groups = 3;
        assert!(groups.validate().is_err());

        let mut dtype = base();
        dtype.dtype = DType::U8;
        assert!(dtype.validate().is_err());
    }
}
