//! Normalisation layers and the layer-tree capability consumed by the
//! style-sharing patch.
//!
//! Layers here are assembled from Candle primitives and exposed through the
//! [`norm::NormalizationLayer`] trait so callers can swap an implementation
//! behind a [`tree::NormHandle`] without touching the surrounding block.

pub mod checks;
pub mod norm;
pub mod tree;

pub use norm::{GroupNorm, LayerNorm, NormConfig, NormKind, NormalizationLayer};
pub use tree::{node_at_mut, LayerKind, LayerNode, LayerPath, NormHandle};
