//! A compact latent denoiser used as the host for attention and norm patches.
//!
//! The network alternates group-normalised residual blocks with spatial
//! transformer blocks and exposes its module hierarchy through
//! [`layers::LayerNode`], so patches can locate and swap its normalisation
//! layers. Self-attention calls route through an optional
//! [`SelfAttentionHook`] supplied when a patched copy is built.

pub mod block;
pub mod config;
pub mod hooks;
pub mod model;

pub use block::{DenoiserBlock, FeedForward, ResBlock, SelfAttention, TransformerBlock};
pub use config::ModelConfig;
pub use hooks::{AttentionOptions, PatchableModel, SelfAttentionHook};
pub use model::Denoiser;
