//! Syntax tree data passed from host to view.

use crate::{RemotingError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One node of an extracted syntax tree.
///
/// Offsets are a half-open `[start_pos, end_pos)` byte range in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntaxTreeNode {
    pub name: String,
    /// Name of the property under which the parent holds this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_property_name: Option<String>,
    #[serde(default)]
    pub children: Vec<SyntaxTreeNode>,
    pub start_pos: usize,
    pub end_pos: usize,
}

impl SyntaxTreeNode {
    pub fn new(name: impl Into<String>, start_pos: usize, end_pos: usize) -> Self {
        Self {
            name: name.into(),
            parent_property_name: None,
            children: Vec::new(),
            start_pos,
            end_pos,
        }
    }

    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.parent_property_name = Some(property.into());
        self
    }

    pub fn with_child(mut self, child: SyntaxTreeNode) -> Self {
        self.children.push(child);
        self
    }

    /// Follow child indices from this node.
    pub fn descendant(&self, path: &[usize]) -> Option<&SyntaxTreeNode> {
        path.iter()
            .try_fold(self, |node, &index| node.children.get(index))
    }

    pub fn descendant_mut(&mut self, path: &[usize]) -> Option<&mut SyntaxTreeNode> {
        path.iter()
            .try_fold(self, |node, &index| node.children.get_mut(index))
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(SyntaxTreeNode::node_count).sum::<usize>()
    }
}

/// Source of syntax trees for the host.
///
/// Extraction from source text lives outside this crate; implementations hand
/// over a tree that was built elsewhere.
pub trait SyntaxTreeProvider: Send + Sync {
    /// The tree for the current source, or `None` if there is nothing to show.
    fn root_node(&self) -> Result<Option<SyntaxTreeNode>>;

    /// File whose changes should trigger a reload, if any.
    fn watched_path(&self) -> Option<&Path> {
        None
    }
}

/// Reads a pre-extracted tree from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonTreeProvider {
    path: PathBuf,
}

impl JsonTreeProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SyntaxTreeProvider for JsonTreeProvider {
    fn root_node(&self) -> Result<Option<SyntaxTreeNode>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content).map(Some).map_err(|e| RemotingError::Validation {
            field: self.path.display().to_string(),
            message: format!("not a syntax tree: {}", e),
        })
    }

    fn watched_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
