//! Discovery of normalisation layers eligible for sharing.

use layers::{LayerKind, LayerNode, LayerPath};

/// Paths to the normalisation layers found by [`collect_norm_layers`], in
/// visit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormRegistry {
    group: Vec<LayerPath>,
    layer: Vec<LayerPath>,
}

impl NormRegistry {
    pub fn group_norms(&self) -> &[LayerPath] {
        &self.group
    }

    pub fn layer_norms(&self) -> &[LayerPath] {
        &self.layer
    }

    pub fn len(&self) -> usize {
        self.group.len() + self.layer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty() && self.layer.is_empty()
    }
}

/// Walks the tree below `root` and records the norms to share.
///
/// Layer norms are always descended into. A recorded group norm is treated as
/// a leaf; an unrecorded one is descended into like any other node.
pub fn collect_norm_layers(
    root: &dyn LayerNode,
    share_layer_norm: bool,
    share_group_norm: bool,
) -> NormRegistry {
    let mut registry = NormRegistry::default();
    visit(
        root,
        LayerPath::root(),
        share_layer_norm,
        share_group_norm,
        &mut registry,
    );
    registry
}

fn visit(
    node: &dyn LayerNode,
    path: LayerPath,
    share_layer_norm: bool,
    share_group_norm: bool,
    registry: &mut NormRegistry,
) {
    match node.kind() {
        LayerKind::LayerNorm if share_layer_norm => {
            log::debug!("recording layer norm {} at {path}", node.name());
            registry.layer.push(path.clone());
        }
        LayerKind::GroupNorm if share_group_norm => {
            log::debug!("recording group norm {} at {path}", node.name());
            registry.group.push(path);
            return;
        }
        _ => {}
    }

    for (index, child) in node.children().into_iter().enumerate() {
        visit(
            child,
            path.child(index),
            share_layer_norm,
            share_group_norm,
            registry,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ToyNode {
        name: &'static str,
        kind: LayerKind,
        children: Vec<ToyNode>,
    }

    impl ToyNode {
        fn new(name: &'static str, kind: LayerKind, children: Vec<ToyNode>) -> Self {
            Self {
                name,
                kind,
                children,
            }
        }
    }

    impl LayerNode for ToyNode {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> LayerKind {
            self.kind
        }

        fn children(&self) -> Vec<&dyn LayerNode> {
            self.children.iter().map(|c| c as &dyn LayerNode).collect()
        }

        fn children_mut(&mut self) -> Vec<&mut dyn LayerNode> {
            self.children
                .iter_mut()
                .map(|c| c as &mut dyn LayerNode)
                .collect()
        }
    }

    fn toy_tree() -> ToyNode {
        ToyNode::new(
            "root",
            LayerKind::Other,
            vec![
                ToyNode::new("ln_a", LayerKind::LayerNorm, Vec::new()),
                ToyNode::new(
                    "gn",
                    LayerKind::GroupNorm,
                    vec![ToyNode::new("gn.ln", LayerKind::LayerNorm, Vec::new())],
                ),
                ToyNode::new(
                    "block",
                    LayerKind::Other,
                    vec![ToyNode::new(
                        "ln_b",
                        LayerKind::LayerNorm,
                        vec![ToyNode::new("ln_b.ln", LayerKind::LayerNorm, Vec::new())],
                    )],
                ),
            ],
        )
    }

    fn paths(raw: &[Vec<usize>]) -> Vec<LayerPath> {
        raw.iter().cloned().map(LayerPath::from).collect()
    }

    #[test]
    fn recorded_group_norms_stop_recursion() {
        let registry = collect_norm_layers(&toy_tree(), true, true);
        assert_eq!(registry.group_norms(), paths(&[vec![1]]).as_slice());
        assert_eq!(
            registry.layer_norms(),
            paths(&[vec![0], vec![2, 0], vec![2, 0, 0]]).as_slice()
        );
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn unrecorded_group_norms_are_descended() {
        let registry = collect_norm_layers(&toy_tree(), true, false);
        assert!(registry.group_norms().is_empty());
        assert_eq!(
            registry.layer_norms(),
            paths(&[vec![0], vec![1, 0], vec![2, 0], vec![2, 0, 0]]).as_slice()
        );
    }

    #[test]
    fn group_only_and_disabled_modes() {
        let registry = collect_norm_layers(&toy_tree(), false, true);
        assert_eq!(registry.group_norms(), paths(&[vec![1]]).as_slice());
        assert!(registry.layer_norms().is_empty());

        assert!(collect_norm_layers(&toy_tree(), false, false).is_empty());
    }
}
