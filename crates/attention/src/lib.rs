//! Scaled dot-product attention primitives for the denoiser blocks.
//!
//! Inputs follow the host layout `[batch, seq_len, heads * head_dim]`; kernels
//! split heads internally. Keys and values may be longer than the queries,
//! which is what lets a block attend to keys borrowed from another batch
//! element. Reductions are performed in `f32` unless the configuration asks to
//! inherit the input dtype, and the output matches the query dtype and shape.
//!
//! Kernels come in an unmasked and a masked variant. [`dispatch`] picks between
//! them purely on whether a mask is present.

pub mod core;
pub mod dispatch;
pub mod masks;
pub mod reference;

pub use core::{Attention, AttentionError, Config, PrecisionPolicy};
pub use dispatch::scaled_dot_product;
pub use reference::ExactAttention;
