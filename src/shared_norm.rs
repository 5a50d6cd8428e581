//! Normalisation layers whose statistics include the style element.

use std::sync::Arc;

use candle_core::{Tensor, D};
use layers::{node_at_mut, LayerNode, LayerPath, NormConfig, NormHandle, NormalizationLayer};

use crate::broadcast::concat_first_seq;
use crate::errors::{Result, StyleAlignedError};
use crate::walker::{collect_norm_layers, NormRegistry};

/// Decorator that widens its input with the style elements along the sequence
/// axis, runs the wrapped layer, and keeps only the original positions.
#[derive(Clone)]
pub struct SharedNorm {
    original: Arc<dyn NormalizationLayer>,
}

impl std::fmt::Debug for SharedNorm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedNorm")
            .field("kind", &self.original.kind())
            .finish()
    }
}

impl SharedNorm {
    pub fn new(original: Arc<dyn NormalizationLayer>) -> Self {
        Self { original }
    }

    pub fn original(&self) -> &Arc<dyn NormalizationLayer> {
        &self.original
    }
}

impl NormalizationLayer for SharedNorm {
    fn config(&self) -> &NormConfig {
        self.original.config()
    }

    fn forward(&self, hidden: &Tensor) -> candle_core::Result<Tensor> {
        let len = hidden.dim(D::Minus2)?;
        let widened = concat_first_seq(hidden, 1.0)?;
        self.original.forward(&widened)?.narrow(D::Minus2, 0, len)
    }
}

/// Installs a [`SharedNorm`] into `handle`.
///
/// The handle keeps the first layer it ever held; wrapping again re-wraps that
/// layer instead of the current wrapper.
pub fn wrap(handle: &mut NormHandle) {
    log::debug!(
        "sharing norm {} (already shared: {})",
        handle.name(),
        handle.is_replaced()
    );
    handle.install(|original| Arc::new(SharedNorm::new(original)));
}

fn handle_at<'a>(root: &'a mut dyn LayerNode, path: &LayerPath) -> Result<&'a mut NormHandle> {
    let node =
        node_at_mut(root, path).ok_or_else(|| StyleAlignedError::UnknownPath(path.clone()))?;
    let kind = node.kind();
    node.norm_handle_mut()
        .ok_or_else(|| StyleAlignedError::MissingNormHandle {
            path: path.clone(),
            kind,
        })
}

/// Finds the selected norms below `root` and wraps each of them, group norms
/// first.
pub fn register_shared_norm(
    root: &mut dyn LayerNode,
    share_group_norm: bool,
    share_layer_norm: bool,
) -> Result<NormRegistry> {
    let registry = collect_norm_layers(&*root, share_layer_norm, share_group_norm);
    log::info!(
        "patching {} group norms, {} layer norms",
        registry.group_norms().len(),
        registry.layer_norms().len()
    );

    for path in registry.group_norms().iter().chain(registry.layer_norms()) {
        wrap(handle_at(root, path)?);
    }
    Ok(registry)
}

/// Puts back the layers cached by [`register_shared_norm`]. Returns how many
/// handles were actually restored.
pub fn restore_shared_norm(root: &mut dyn LayerNode, registry: &NormRegistry) -> Result<usize> {
    let mut restored = 0;
    for path in registry.group_norms().iter().chain(registry.layer_norms()) {
        if handle_at(root, path)?.restore() {
            restored += 1;
        }
    }
    log::debug!("restored {restored} norms");
    Ok(restored)
}
