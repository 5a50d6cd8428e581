//! Layer-tree capability used to discover and swap normalisation layers.
//!
//! Host models expose their module hierarchy through [`LayerNode`]. Nodes
//! report a closed [`LayerKind`] so walkers dispatch on a tag rather than on
//! concrete types. Normalisation slots are [`NormHandle`]s: they own the active
//! layer and, once something has been installed over it, the original layer
//! the replacement delegates to.

use std::fmt;
use std::sync::Arc;

use crate::norm::{NormKind, NormalizationLayer};

/// Closed set of node kinds a walker distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    GroupNorm,
    LayerNorm,
    Other,
}

impl From<NormKind> for LayerKind {
    fn from(kind: NormKind) -> Self {
        match kind {
            NormKind::LayerNorm => LayerKind::LayerNorm,
            NormKind::GroupNorm { .. } => LayerKind::GroupNorm,
        }
    }
}

/// Child-index path from a tree root to one of its descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LayerPath(Vec<usize>);

impl LayerPath {
    /// The empty path, addressing the root itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// Path to the `index`-th child of the node addressed by `self`.
    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<usize>> for LayerPath {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl fmt::Display for LayerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        let parts = self.0.iter().map(|i| i.to_string()).collect::<Vec<_>>();
        f.write_str(&parts.join("."))
    }
}

/// A node in a model's module hierarchy.
///
/// `children` and `children_mut` must list the same nodes in the same order so
/// that a [`LayerPath`] recorded during a read-only walk resolves to the same
/// node afterwards.
pub trait LayerNode {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn kind(&self) -> LayerKind;

    fn children(&self) -> Vec<&dyn LayerNode>;

    fn children_mut(&mut self) -> Vec<&mut dyn LayerNode>;

    /// The normalisation slot carried by this node, if any.
    fn norm_handle_mut(&mut self) -> Option<&mut NormHandle> {
        None
    }
}

/// Resolves `path` below `root`, returning `None` if any index is out of range.
pub fn node_at_mut<'a>(root: &'a mut dyn LayerNode, path: &LayerPath) -> Option<&'a mut dyn LayerNode> {
    let mut node = root;
    for &index in path.indices() {
        node = node.children_mut().into_iter().nth(index)?;
    }
    Some(node)
}

/// Owning slot for a normalisation layer inside a model.
///
/// Cloning a handle is cheap and shares the underlying layer parameters, but
/// installing a replacement only ever affects the handle it is called on.
#[derive(Clone)]
pub struct NormHandle {
    name: String,
    active: Arc<dyn NormalizationLayer>,
    original: Option<Arc<dyn NormalizationLayer>>,
}

impl fmt::Debug for NormHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormHandle")
            .field("name", &self.name)
            .field("kind", &self.norm_kind())
            .field("replaced", &self.is_replaced())
            .finish()
    }
}

impl NormHandle {
    pub fn new(name: impl Into<String>, layer: Arc<dyn NormalizationLayer>) -> Self {
        Self {
            name: name.into(),
            active: layer,
            original: None,
        }
    }

    /// The layer currently used by [`NormHandle::forward`].
    pub fn active(&self) -> &Arc<dyn NormalizationLayer> {
        &self.active
    }

    /// The layer cached before the first replacement, if one happened.
    pub fn original(&self) -> Option<&Arc<dyn NormalizationLayer>> {
        self.original.as_ref()
    }

    pub fn is_replaced(&self) -> bool {
        self.original.is_some()
    }

    /// Kind of the underlying (pre-replacement) layer.
    pub fn norm_kind(&self) -> NormKind {
        self.original.as_ref().unwrap_or(&self.active).kind()
    }

    /// Replaces the active layer with `build(original)`.
    ///
    /// The original layer is captured on the first call only; later calls hand
    /// the same cached layer to `build`, so replacements never stack.
    pub fn install<F>(&mut self, build: F)
    where
        F: FnOnce(Arc<dyn NormalizationLayer>) -> Arc<dyn NormalizationLayer>,
    {
        if self.original.is_none() {
            log::trace!("caching original layer for {}", self.name);
        }
        let original = self
            .original
            .get_or_insert_with(|| Arc::clone(&self.active))
            .clone();
        self.active = build(original);
    }

    /// Reinstates the cached original layer. Returns `false` if nothing was
    /// installed.
    pub fn restore(&mut self) -> bool {
        match self.original.take() {
            Some(original) => {
                self.active = original;
                true
            }
            None => false,
        }
    }

    pub fn forward(&self, hidden: &candle_core::Tensor) -> candle_core::Result<candle_core::Tensor> {
        self.active.forward(hidden)
    }
}

impl LayerNode for NormHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> LayerKind {
        self.norm_kind().into()
    }

    fn children(&self) -> Vec<&dyn LayerNode> {
        Vec::new()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn LayerNode> {
        Vec::new()
    }

    fn norm_handle_mut(&mut self) -> Option<&mut NormHandle> {
        Some(self)
    }
}
