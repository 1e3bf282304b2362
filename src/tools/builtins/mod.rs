//! Built-in tool implementations.
//!
//! Each sub-module registers one family of tools against the shared
//! store or analyzer it needs.

pub mod analyze;
pub mod announcements;
pub mod attachment;

use std::sync::Arc;

use crate::analysis::DocumentAnalyzer;
use crate::store::AttachmentStore;
use crate::tools::ToolRegistry;

/// Register every built-in tool.
pub fn register_builtins(
    registry: &mut ToolRegistry,
    store: Arc<AttachmentStore>,
    analyzer: Arc<DocumentAnalyzer>,
) -> anyhow::Result<()> {
    announcements::register(registry, Arc::clone(&store))?;
    attachment::register(registry, store)?;
    analyze::register(registry, analyzer)?;
    Ok(())
}
