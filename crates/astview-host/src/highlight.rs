//! Editor highlighting driven by the view.
//!
//! The view marks the source range of the node under the pointer; the host
//! forwards that to whatever editor it is attached to.

use astview_core::services::SyntaxTreeViewBackend;
use astview_core::Result;
use async_trait::async_trait;
use tracing::info;

/// Decorates a byte range in the editor.
pub trait EditorHighlighter: Send + Sync + 'static {
    fn clear(&self);

    fn highlight(&self, start_pos: usize, end_pos: usize);
}

/// Highlighter for a headless host: logs the marked range.
#[derive(Debug, Default)]
pub struct LoggingHighlighter;

impl EditorHighlighter for LoggingHighlighter {
    fn clear(&self) {
        info!("Marked region cleared");
    }

    fn highlight(&self, start_pos: usize, end_pos: usize) {
        info!("Marked region [{}, {})", start_pos, end_pos);
    }
}

/// Host-side implementation of the view's backend contract.
pub struct SyntaxTreeBackend<H> {
    highlighter: H,
}

impl<H: EditorHighlighter> SyntaxTreeBackend<H> {
    pub fn new(highlighter: H) -> Self {
        Self { highlighter }
    }
}

#[async_trait]
impl<H: EditorHighlighter> SyntaxTreeViewBackend for SyntaxTreeBackend<H> {
    async fn clear_marked_region(&self) -> Result<()> {
        self.highlighter.clear();
        Ok(())
    }

    async fn set_marked_region(&self, start_pos: usize, end_pos: usize) -> Result<()> {
        // Views may send an inverted range while a node is being replaced.
        let (start, end) = if start_pos <= end_pos {
            (start_pos, end_pos)
        } else {
            (end_pos, start_pos)
        };
        self.highlighter.highlight(start, end);
        Ok(())
    }
}
