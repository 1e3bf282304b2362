//! Built-in `get_attachment` tool: resolve an announcement and download
//! its first attachment into the scratch directory.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::store::{AttachmentStore, AttachmentTarget};
use crate::tools::{handler_fn, str_arg, ParamSpec, ToolRegistry, ToolSpec};

pub fn register(registry: &mut ToolRegistry, store: Arc<AttachmentStore>) -> anyhow::Result<()> {
    let spec = ToolSpec::new(
        "get_attachment",
        "Download the first attachment of an announcement. Select the announcement by \
         record id, by search term (first match; the term 'latest' means most recent), \
         or with latest=true for the most recently sent one. Returns the local path to \
         pass to analyze_document.",
    )
    .param(ParamSpec::string("announcement_id", "Exact record id"))
    .param(ParamSpec::string("search_term", "Text to search titles and descriptions for"))
    .param(ParamSpec::boolean("latest", "Use the most recently sent announcement"));

    registry.register(
        spec,
        handler_fn(move |args| {
            let store = Arc::clone(&store);
            async move {
                let target = AttachmentTarget::from_selectors(
                    str_arg(&args, "announcement_id"),
                    str_arg(&args, "search_term"),
                    args.get("latest").and_then(Value::as_bool).unwrap_or(false),
                )?;
                let outcome = store.fetch_attachment(&target).await?;
                Ok(json!(outcome))
            }
        }),
    )
}
