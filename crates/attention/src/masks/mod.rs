//! Mask utilities shared by attention implementations.
//!
//! All masks produced here are additive tensors with dtype `f32`, shaped
//! `[batch, 1, q_len, k_len]` so they broadcast across heads. Values are either
//! `0.0` (keep) or `f32::NEG_INFINITY` (discard) to align with Candle's
//! softmax-friendly masking behaviour.

pub mod padding;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use padding::{padding_mask_from_booleans, padding_mask_from_lengths};
