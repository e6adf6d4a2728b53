// ---------------------------------------------------------------------------
// Checkable two-level tree with tri-state parents
// ---------------------------------------------------------------------------

/// Check state of a parent, derived from its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Unchecked,
    Partial,
    Checked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeLeaf<T> {
    pub label: String,
    pub value: T,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode<T> {
    pub label: String,
    pub children: Vec<TreeLeaf<T>>,
}

impl<T> TreeNode<T> {
    pub fn state(&self) -> CheckState {
        let n_checked = self.children.iter().filter(|c| c.checked).count();
        if n_checked == 0 {
            CheckState::Unchecked
        } else if n_checked == self.children.len() {
            CheckState::Checked
        } else {
            CheckState::Partial
        }
    }
}

/// Parents with checkable leaves. A parent is never itself a selection: it
/// only reflects and drives its children.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckTree<T> {
    nodes: Vec<TreeNode<T>>,
}

impl<T> Default for CheckTree<T> {
    fn default() -> Self {
        CheckTree { nodes: Vec::new() }
    }
}

impl<T: Clone> CheckTree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parent with unchecked children given as `(label, value)`.
    pub fn add_parent<I>(&mut self, label: &str, children: I)
    where
        I: IntoIterator<Item = (String, T)>,
    {
        self.nodes.push(TreeNode {
            label: label.to_string(),
            children: children
                .into_iter()
                .map(|(label, value)| TreeLeaf {
                    label,
                    value,
                    checked: false,
                })
                .collect(),
        });
    }

    pub fn nodes(&self) -> &[TreeNode<T>] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Checking a parent checks all of its children; unchecking clears them.
    pub fn set_parent(&mut self, parent: usize, checked: bool) {
        if let Some(node) = self.nodes.get_mut(parent) {
            for leaf in &mut node.children {
                leaf.checked = checked;
            }
        }
    }

    pub fn set_leaf(&mut self, parent: usize, leaf: usize, checked: bool) {
        if let Some(l) = self
            .nodes
            .get_mut(parent)
            .and_then(|n| n.children.get_mut(leaf))
        {
            l.checked = checked;
        }
    }

    /// Values of checked leaves in tree order.
    pub fn checked_leaves(&self) -> Vec<T> {
        self.nodes
            .iter()
            .flat_map(|n| n.children.iter())
            .filter(|l| l.checked)
            .map(|l| l.value.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_of<T: Clone>(tree: &CheckTree<T>, parent: usize) -> Option<CheckState> {
        tree.nodes().get(parent).map(TreeNode::state)
    }

    fn sample_tree() -> CheckTree<String> {
        let mut tree = CheckTree::new();
        tree.add_parent(
            "XPS_205",
            ["Si2p", "O1s", "C1s"].map(|s| (s.to_string(), s.to_string())),
        );
        tree
    }

    #[test]
    fn test_parent_tristate() {
        let mut tree = sample_tree();
        assert_eq!(state_of(&tree, 0), Some(CheckState::Unchecked));
        tree.set_leaf(0, 1, true);
        assert_eq!(state_of(&tree, 0), Some(CheckState::Partial));
        tree.set_parent(0, true);
        assert_eq!(state_of(&tree, 0), Some(CheckState::Checked));
        tree.set_leaf(0, 0, false);
        assert_eq!(state_of(&tree, 0), Some(CheckState::Partial));
        tree.set_parent(0, false);
        assert_eq!(state_of(&tree, 0), Some(CheckState::Unchecked));
        assert_eq!(state_of(&tree, 3), None);
    }

    #[test]
    fn test_checked_leaves_exclude_parent() {
        let mut tree = sample_tree();
        assert!(tree.checked_leaves().is_empty());

        tree.set_parent(0, true);
        let leaves = tree.checked_leaves();
        assert_eq!(leaves, vec!["Si2p", "O1s", "C1s"]);
        assert!(!leaves.contains(&"XPS_205".to_string()));
    }

    #[test]
    fn test_leaf_sharing_parent_label_is_still_reported() {
        // A spectrum may be named like its sample; only structure decides.
        let mut tree = CheckTree::new();
        tree.add_parent("Si", [("Si".to_string(), 0usize), ("SiO2".to_string(), 1)]);
        tree.set_leaf(0, 0, true);
        assert_eq!(tree.checked_leaves(), vec![0]);
    }

    #[test]
    fn test_clear_and_rebuild() {
        let mut tree = sample_tree();
        tree.set_parent(0, true);
        tree.add_parent("XPS_206", vec![("Ti2p".to_string(), "Ti2p".to_string())]);
        assert_eq!(tree.nodes().len(), 2);
        tree.clear();
        assert!(tree.is_empty());
        assert!(tree.checked_leaves().is_empty());
        tree.add_parent("All", vec![("0".to_string(), "0".to_string())]);
        assert_eq!(state_of(&tree, 0), Some(CheckState::Unchecked));
    }
}
