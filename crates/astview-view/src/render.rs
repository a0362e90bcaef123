//! Plain text rendering of the view model.

use crate::model::{NodePath, ViewModel};
use astview_core::SyntaxTreeNode;
use std::fmt::Write;

/// Shown when the host has no tree to offer.
pub const EMPTY_TREE_TEXT: &str = "No syntax tree provider available.";

/// Render the tree as an indented outline.
///
/// Each line carries the node's path, so it can be fed back to the
/// `hover` and `toggle` commands. Markers: `>` innermost selected,
/// `*` selected, `~` hovered range, `+` collapsed.
pub fn render(model: &ViewModel) -> String {
    let Some(root) = model.root() else {
        return format!("{}\n", EMPTY_TREE_TEXT);
    };

    let mut out = String::new();
    let mut path = Vec::new();
    render_node(model, &root, &mut path, 0, &mut out);
    out
}

fn render_node(
    model: &ViewModel,
    node: &SyntaxTreeNode,
    path: &mut NodePath,
    depth: usize,
    out: &mut String,
) {
    let collapsed = model.is_collapsed(path);
    let selection = if model.is_innermost_selected(path) {
        '>'
    } else if model.is_selected(path) {
        '*'
    } else {
        ' '
    };
    let hover = if model.is_parent_or_this_hovered(path) {
        '~'
    } else {
        ' '
    };
    let fold = if collapsed && !node.children.is_empty() {
        '+'
    } else {
        ' '
    };

    let _ = write!(out, "{}{}{} {:indent$}", selection, hover, fold, "", indent = depth * 2);
    if let Some(property) = &node.parent_property_name {
        let _ = write!(out, "{}: ", property);
    }
    let _ = writeln!(
        out,
        "{} [{}, {}]  ({})",
        node.name,
        node.start_pos,
        node.end_pos,
        format_path(path)
    );

    if collapsed {
        return;
    }
    for (index, child) in node.children.iter().enumerate() {
        path.push(index);
        render_node(model, child, path, depth + 1, out);
        path.pop();
    }
}

/// `0.1.2` style path, `root` for the empty path.
pub fn format_path(path: &[usize]) -> String {
    if path.is_empty() {
        return "root".to_string();
    }
    path.iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(".")
}
