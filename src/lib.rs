//! Style-aligned generation for diffusion denoisers.
//!
//! A patched model lets every element of a batch attend to the keys and values
//! of the batch's style elements (index `0` and `batch / 2`), restyles
//! queries and keys with AdaIN towards those elements, and can widen group or
//! layer normalisation statistics with them as well. The result is a batch of
//! images sharing one visual style.
//!
//! ```no_run
//! use style_aligned::{ShareNorm, StyleAlignedPatch};
//! # fn demo(model: &model::Denoiser) -> style_aligned::Result<()> {
//! let patched = StyleAlignedPatch::default().patch(model, ShareNorm::Both, 1.0, None)?;
//! # let _ = patched;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod errors;
pub mod patch;
pub mod processor;
pub mod shared_norm;
pub mod stats;
pub mod walker;

pub use broadcast::{concat_first, concat_first_seq, expand_first};
pub use config::{PatchConfig, ShareNorm, StyleAlignedArgs};
pub use errors::{Result, StyleAlignedError};
pub use patch::StyleAlignedPatch;
pub use processor::SharedAttentionProcessor;
pub use shared_norm::{register_shared_norm, restore_shared_norm, wrap, SharedNorm};
pub use stats::{adain, calc_mean_std};
pub use walker::{collect_norm_layers, NormRegistry};
