//! Portable, exact implementations of multi-head attention.
//!
//! These paths favour clarity over absolute performance and serve as the
//! baseline the denoiser blocks run on when no optimized kernel is supplied.

pub mod exact;

pub use exact::ExactAttention;
