//! Built-in announcement query tools: `fetch_all_announcements`,
//! `search_announcements` and `find_announcement_by_title`.

use std::sync::Arc;

use serde_json::json;

use crate::error::AgentError;
use crate::store::AttachmentStore;
use crate::tools::{handler_fn, str_arg, ParamSpec, ToolRegistry, ToolSpec};

pub fn register(registry: &mut ToolRegistry, store: Arc<AttachmentStore>) -> anyhow::Result<()> {
    let s = Arc::clone(&store);
    registry.register(
        ToolSpec::new(
            "fetch_all_announcements",
            "Fetch every announcement (title, description, sent time, attachments).",
        ),
        handler_fn(move |_args| {
            let store = Arc::clone(&s);
            async move {
                let all = store.fetch_all().await?;
                Ok(json!(all))
            }
        }),
    )?;

    let s = Arc::clone(&store);
    registry.register(
        ToolSpec::new(
            "search_announcements",
            "Search announcements whose title or description contains the query (case-insensitive). \
             Returns an empty list when nothing matches.",
        )
        .param(ParamSpec::string("query", "Text to look for").required()),
        handler_fn(move |args| {
            let store = Arc::clone(&s);
            async move {
                let query = str_arg(&args, "query").unwrap_or_default();
                let found = store.search(query).await?;
                Ok(json!(found))
            }
        }),
    )?;

    let s = store;
    registry.register(
        ToolSpec::new(
            "find_announcement_by_title",
            "Find the announcement whose title matches exactly (case-insensitive).",
        )
        .param(ParamSpec::string("title", "Exact announcement title").required()),
        handler_fn(move |args| {
            let store = Arc::clone(&s);
            async move {
                let title = str_arg(&args, "title")
                    .ok_or_else(|| AgentError::Validation("missing 'title'".into()))?;
                let found = store.find_by_title(title).await?;
                Ok(json!(found))
            }
        }),
    )?;

    Ok(())
}
