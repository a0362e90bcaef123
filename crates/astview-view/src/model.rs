//! View model: tree, cursor, hover and collapse state of one view.
//!
//! Nodes are addressed by their path of child indices from the root, the same
//! addressing the host uses for `setSubTree`.

use astview_core::services::{BackendProxy, SyntaxTreeViewFrontend};
use astview_core::{RemotingError, Result, SyntaxTreeNode};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Path of child indices from the root. Empty is the root itself.
pub type NodePath = Vec<usize>;

#[derive(Debug, Default)]
struct ViewState {
    root: Option<SyntaxTreeNode>,
    cursor: Option<usize>,
    hovered: Option<NodePath>,
    collapsed: HashSet<NodePath>,
}

impl ViewState {
    fn node(&self, path: &[usize]) -> Option<&SyntaxTreeNode> {
        self.root.as_ref()?.descendant(path)
    }

    fn is_selected(&self, node: &SyntaxTreeNode) -> bool {
        self.cursor
            .map(|pos| node.start_pos <= pos && pos <= node.end_pos)
            .unwrap_or(false)
    }

    fn hovered_region(&self) -> Option<(usize, usize)> {
        let path = self.hovered.as_ref()?;
        self.node(path).map(|node| (node.start_pos, node.end_pos))
    }

    /// Drop per-node state at or below `path`.
    fn forget_below(&mut self, path: &[usize]) {
        self.collapsed.retain(|p| !p.starts_with(path));
        if self.hovered.as_ref().is_some_and(|h| h.starts_with(path)) {
            self.hovered = None;
        }
    }
}

/// State of one view, served to the host as `SyntaxTreeViewFrontend`.
pub struct ViewModel {
    state: Mutex<ViewState>,
    backend: Mutex<Option<BackendProxy>>,
    revision: watch::Sender<u64>,
}

impl Default for ViewModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewModel {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Mutex::new(ViewState::default()),
            backend: Mutex::new(None),
            revision,
        }
    }

    /// Bumped after every visible change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Attach (or detach with `None`) the host's highlighting controls.
    ///
    /// A fresh backend immediately receives the current hover region.
    pub fn set_backend(&self, backend: Option<BackendProxy>) {
        let attached = backend.is_some();
        if let Ok(mut current) = self.backend.lock() {
            *current = backend;
        }
        if attached {
            self.mark_region();
        }
        self.touch();
    }

    pub fn is_connected(&self) -> bool {
        self.backend
            .lock()
            .map(|backend| backend.as_ref().is_some_and(BackendProxy::is_connected))
            .unwrap_or(false)
    }

    pub fn root(&self) -> Option<SyntaxTreeNode> {
        self.lock().ok().and_then(|state| state.root.clone())
    }

    pub fn cursor(&self) -> Option<usize> {
        self.lock().ok().and_then(|state| state.cursor)
    }

    pub fn hovered(&self) -> Option<NodePath> {
        self.lock().ok().and_then(|state| state.hovered.clone())
    }

    /// Whether the cursor lies within the node (both ends inclusive).
    pub fn is_selected(&self, path: &[usize]) -> bool {
        self.with_node(path, |state, node| state.is_selected(node))
    }

    /// Selected and without children.
    pub fn is_innermost_selected(&self, path: &[usize]) -> bool {
        self.with_node(path, |state, node| {
            state.is_selected(node) && node.children.is_empty()
        })
    }

    /// Path of the first innermost selected node, in document order.
    pub fn innermost_selected(&self) -> Option<NodePath> {
        let state = self.lock().ok()?;
        let root = state.root.as_ref()?;
        let mut path = Vec::new();
        find_innermost(&*state, root, &mut path).then_some(path)
    }

    /// The node itself or one of its descendants is hovered.
    pub fn is_child_or_this_hovered(&self, path: &[usize]) -> bool {
        self.lock()
            .ok()
            .and_then(|state| state.hovered.as_ref().map(|h| h.starts_with(path)))
            .unwrap_or(false)
    }

    /// The node itself or one of its ancestors is hovered.
    pub fn is_parent_or_this_hovered(&self, path: &[usize]) -> bool {
        self.lock()
            .ok()
            .and_then(|state| state.hovered.as_ref().map(|h| path.starts_with(h)))
            .unwrap_or(false)
    }

    /// Move the pointer onto a node (`Some`) or off the tree (`None`).
    ///
    /// The host is asked to mark the hovered node's source range, or to clear
    /// the marking.
    pub fn set_hovered(&self, path: Option<NodePath>) -> Result<()> {
        {
            let mut state = self.lock()?;
            if let Some(path) = &path {
                if state.node(path).is_none() {
                    return Err(invalid_path(path));
                }
            }
            if state.hovered == path {
                return Ok(());
            }
            state.hovered = path;
        }
        self.mark_region();
        self.touch();
        Ok(())
    }

    pub fn is_collapsed(&self, path: &[usize]) -> bool {
        self.lock()
            .map(|state| state.collapsed.contains(path))
            .unwrap_or(false)
    }

    /// Flip the collapsed flag of a node. Returns the new value.
    pub fn toggle_collapsed(&self, path: &[usize]) -> Result<bool> {
        let collapsed = {
            let mut state = self.lock()?;
            if state.node(path).is_none() {
                return Err(invalid_path(path));
            }
            if state.collapsed.remove(path) {
                false
            } else {
                state.collapsed.insert(path.to_vec());
                true
            }
        };
        self.touch();
        Ok(collapsed)
    }

    /// Replace the node at `path`, or the whole tree for an empty path.
    ///
    /// Views that ignore `path` and always swap the root behave the same for
    /// hosts that only ever send `[]`, which is all `ViewSession` sends. A
    /// non-empty path is spliced in place here instead of replacing the root.
    ///
    /// Returns `false` (and changes nothing) if `path` does not lead to a node.
    pub fn apply_sub_tree(&self, path: &[usize], tree: SyntaxTreeNode) -> bool {
        let hover_cleared = {
            let Ok(mut state) = self.lock() else {
                return false;
            };
            let had_hover = state.hovered.is_some();

            if path.is_empty() {
                state.root = Some(tree);
            } else {
                let Some(slot) = state.root.as_mut().and_then(|root| root.descendant_mut(path))
                else {
                    warn!("Ignoring sub tree for invalid path {:?}", path);
                    return false;
                };
                *slot = tree;
            }
            state.forget_below(path);
            had_hover && state.hovered.is_none()
        };

        if hover_cleared {
            self.mark_region();
        }
        self.touch();
        true
    }

    fn lock(&self) -> Result<MutexGuard<'_, ViewState>> {
        self.state
            .lock()
            .map_err(|_| RemotingError::Other("view state lock poisoned".to_string()))
    }

    fn with_node(&self, path: &[usize], f: impl FnOnce(&ViewState, &SyntaxTreeNode) -> bool) -> bool {
        self.lock()
            .ok()
            .and_then(|state| state.node(path).map(|node| f(&*state, node)))
            .unwrap_or(false)
    }

    /// Forward the hover state to the host, if connected.
    fn mark_region(&self) {
        let region = match self.lock() {
            Ok(state) => state.hovered_region(),
            Err(_) => return,
        };
        let backend = match self.backend.lock() {
            Ok(backend) => backend.clone(),
            Err(_) => return,
        };
        let Some(backend) = backend else { return };

        let result = match region {
            Some((start, end)) => backend.set_marked_region(start, end),
            None => backend.clear_marked_region(),
        };
        if let Err(e) = result {
            debug!("Could not update marked region: {}", e);
        }
    }

    fn touch(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

fn find_innermost(state: &ViewState, node: &SyntaxTreeNode, path: &mut NodePath) -> bool {
    if !state.is_selected(node) {
        return false;
    }
    if node.children.is_empty() {
        return true;
    }
    for (index, child) in node.children.iter().enumerate() {
        path.push(index);
        if find_innermost(state, child, path) {
            return true;
        }
        path.pop();
    }
    false
}

fn invalid_path(path: &[usize]) -> RemotingError {
    RemotingError::Validation {
        field: "path".to_string(),
        message: format!("no node at {:?}", path),
    }
}

#[async_trait]
impl SyntaxTreeViewFrontend for ViewModel {
    async fn set_cursor_pos(&self, pos: usize) -> Result<()> {
        self.lock()?.cursor = Some(pos);
        self.touch();
        Ok(())
    }

    async fn set_sub_tree(&self, path: Vec<usize>, tree: SyntaxTreeNode) -> Result<()> {
        self.apply_sub_tree(&path, tree);
        Ok(())
    }

    async fn reset_tree(&self) -> Result<()> {
        let had_hover = {
            let mut state = self.lock()?;
            let had_hover = state.hovered.is_some();
            state.root = None;
            state.forget_below(&[]);
            had_hover
        };
        if had_hover {
            self.mark_region();
        }
        self.touch();
        Ok(())
    }
}
