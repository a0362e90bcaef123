//! Astview View - displays a syntax tree served by an astview host.
//!
//! The view serves `SyntaxTreeViewFrontend` through [`ViewModel`] and calls
//! back into the host's `SyntaxTreeViewBackend` while the pointer moves over
//! the tree.

pub mod commands;
pub mod model;
pub mod render;

pub use commands::Command;
pub use model::{NodePath, ViewModel};
pub use render::{render, EMPTY_TREE_TEXT};

use astview_core::{Result, SyntaxTreeNode};

/// Tree shown when the view runs without a host.
pub fn sample_tree() -> Result<SyntaxTreeNode> {
    Ok(serde_json::from_str(include_str!("sample-tree.json"))?)
}
