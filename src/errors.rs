use thiserror::Error;

use layers::LayerPath;

pub type Result<T> = std::result::Result<T, StyleAlignedError>;

#[derive(Error, Debug)]
pub enum StyleAlignedError {
    #[error("scale must lie in [0, 1], got {0}")]
    InvalidScale(f64),

    #[error("scale `{0}` is not a number")]
    UnparsableScale(String),

    #[error("unknown share_norm mode `{0}` (expected disabled, group, layer or both)")]
    UnknownShareNorm(String),

    #[error("no layer at {0}")]
    UnknownPath(LayerPath),

    #[error("layer at {path} reports kind {kind:?} but exposes no norm handle")]
    MissingNormHandle {
        path: LayerPath,
        kind: layers::LayerKind,
    },

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}
