use eframe::egui::{self, collapsing_header::CollapsingState, Id, Ui};

use crate::tree::{CheckState, CheckTree};

// ---------------------------------------------------------------------------
// Tri-state checkbox tree widget
// ---------------------------------------------------------------------------

enum TreeEdit {
    Parent(usize, bool),
    Leaf(usize, usize, bool),
}

/// Draw `tree` as collapsible parents with checkable leaves. Returns true
/// when any check box changed.
pub fn check_tree<T: Clone>(ui: &mut Ui, id: Id, tree: &mut CheckTree<T>) -> bool {
    let mut edits = Vec::new();

    for (p, node) in tree.nodes().iter().enumerate() {
        CollapsingState::load_with_default_open(ui.ctx(), id.with(p), true)
            .show_header(ui, |ui: &mut Ui| {
                let state = node.state();
                let mut checked = state == CheckState::Checked;
                let checkbox = egui::Checkbox::new(&mut checked, &node.label)
                    .indeterminate(state == CheckState::Partial);
                if ui.add(checkbox).changed() {
                    edits.push(TreeEdit::Parent(p, checked));
                }
            })
            .body(|ui: &mut Ui| {
                for (l, leaf) in node.children.iter().enumerate() {
                    let mut checked = leaf.checked;
                    if ui.checkbox(&mut checked, &leaf.label).changed() {
                        edits.push(TreeEdit::Leaf(p, l, checked));
                    }
                }
            });
    }

    let changed = !edits.is_empty();
    for edit in edits {
        match edit {
            TreeEdit::Parent(p, checked) => tree.set_parent(p, checked),
            TreeEdit::Leaf(p, l, checked) => tree.set_leaf(p, l, checked),
        }
    }
    changed
}
