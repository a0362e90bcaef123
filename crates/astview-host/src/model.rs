//! Tree model: keeps the paired view in sync with the current tree and cursor.

use astview_core::{Result, SyntaxTreeNode, SyntaxTreeProvider, ViewSession};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Current syntax tree and cursor of the host, pushed to a view session.
pub struct TreeModel {
    provider: Box<dyn SyntaxTreeProvider>,
    session: ViewSession,
    state: RwLock<ModelState>,
}

#[derive(Default)]
struct ModelState {
    tree: Option<SyntaxTreeNode>,
    cursor: Option<usize>,
}

impl TreeModel {
    pub fn new(provider: Box<dyn SyntaxTreeProvider>, session: ViewSession) -> Arc<Self> {
        Arc::new(Self {
            provider,
            session,
            state: RwLock::new(ModelState::default()),
        })
    }

    pub fn tree(&self) -> Option<SyntaxTreeNode> {
        self.state.read().ok().and_then(|state| state.tree.clone())
    }

    pub fn cursor(&self) -> Option<usize> {
        self.state.read().ok().and_then(|state| state.cursor)
    }

    /// Re-read the tree from the provider and push it.
    ///
    /// A provider error keeps the previous tree.
    pub fn reload(&self) -> Result<()> {
        let tree = self.provider.root_node()?;
        match &tree {
            Some(root) => info!("Loaded syntax tree: {} nodes", root.node_count()),
            None => info!("No syntax tree available"),
        }
        if let Ok(mut state) = self.state.write() {
            state.tree = tree;
        }
        self.push_tree()
    }

    /// Store the editor cursor and forward it.
    pub fn set_cursor(&self, pos: usize) -> Result<()> {
        if let Ok(mut state) = self.state.write() {
            state.cursor = Some(pos);
        }
        if !self.session.push_cursor(pos)? {
            debug!("No view connected; cursor {} kept for later", pos);
        }
        Ok(())
    }

    /// Send everything a freshly paired view needs.
    pub fn sync_view(&self) -> Result<()> {
        self.push_tree()?;
        if let Some(pos) = self.cursor() {
            self.session.push_cursor(pos)?;
        }
        Ok(())
    }

    fn push_tree(&self) -> Result<()> {
        let tree = self.tree();
        if !self.session.push_tree(tree.as_ref())? {
            debug!("No view connected; tree update deferred");
        }
        Ok(())
    }

    /// Push state to every view that pairs with the session, until the
    /// session is closed.
    pub async fn follow_session(self: Arc<Self>) {
        let mut views = self.session.subscribe();
        loop {
            if views.borrow_and_update().is_some() {
                info!("View connected to session {}", self.session.key());
                if let Err(e) = self.sync_view() {
                    warn!("Failed to sync view: {}", e);
                }
            }
            if views.changed().await.is_err() || self.session.is_closed() {
                break;
            }
        }
    }
}
