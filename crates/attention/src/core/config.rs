//! Configuration options shared by all attention implementations.
//!
//! The [`Config`] struct captures run-time knobs that callers can tune without
//! swapping implementations. [`Config::from_env`] layers environment overrides
//! on top of the defaults.

use std::str::FromStr;

/// Environment variable selecting the score precision (`f32` or `inherit`).
pub const PRECISION_ENV: &str = "ATTENTION_PRECISION";

/// Precision used for the score and softmax computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecisionPolicy {
    /// Promote `q`, `k`, `v` to `f32` before computing scores.
    #[default]
    ForceF32,
    /// Compute in whatever dtype the inputs arrive in.
    Inherit,
}

impl FromStr for PrecisionPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "f32" | "force_f32" | "fp32" => Ok(Self::ForceF32),
            "inherit" => Ok(Self::Inherit),
            other => Err(format!("unknown attention precision `{other}`")),
        }
    }
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub precision: PrecisionPolicy,
}

impl Config {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(PRECISION_ENV) {
            match raw.parse() {
                Ok(precision) => self.precision = precision,
                Err(err) => log::warn!("ignoring {PRECISION_ENV}: {err}"),
            }
        }
    }
}
