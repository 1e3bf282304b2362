//! Built-in `analyze_document` tool.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::analysis::{AnalysisRequest, AnalysisType, DocumentAnalyzer};
use crate::error::AgentError;
use crate::tools::{handler_fn, str_arg, ParamSpec, ToolRegistry, ToolSpec};

pub fn register(
    registry: &mut ToolRegistry,
    analyzer: Arc<DocumentAnalyzer>,
) -> anyhow::Result<()> {
    let settings = analyzer.settings();
    let types: Vec<&str> = AnalysisType::ALL.iter().map(|t| t.as_str()).collect();

    let spec = ToolSpec::new(
        "analyze_document",
        "Analyze a downloaded PDF by sending its first pages as images to a vision model. \
         Use analysis_type 'custom' together with custom_prompt for anything else.",
    )
    .param(ParamSpec::string("local_path", "Path returned by get_attachment").required())
    .param(ParamSpec::one_of("analysis_type", &types[..], "Kind of analysis").required())
    .param(ParamSpec::string(
        "custom_prompt",
        "Instruction for the model; required when analysis_type is 'custom'",
    ))
    .param(
        ParamSpec::integer(
            "max_pages",
            &format!("Pages to analyze (default {})", settings.default_max_pages),
        )
        .range(1, settings.max_pages_cap as i64),
    );

    registry.register(
        spec,
        handler_fn(move |args| {
            let analyzer = Arc::clone(&analyzer);
            async move {
                let request = parse_request(&args)?;
                let analysis = analyzer.analyze(&request).await?;
                Ok(json!({
                    "local_path": request.path,
                    "analysis_type": request.analysis_type,
                    "analysis": analysis,
                }))
            }
        }),
    )
}

fn parse_request(args: &Value) -> Result<AnalysisRequest, AgentError> {
    let path = str_arg(args, "local_path")
        .ok_or_else(|| AgentError::Validation("missing 'local_path'".into()))?;
    let analysis_type = str_arg(args, "analysis_type")
        .unwrap_or_default()
        .parse::<AnalysisType>()
        .map_err(AgentError::Validation)?;
    Ok(AnalysisRequest {
        path: PathBuf::from(path),
        analysis_type,
        custom_prompt: str_arg(args, "custom_prompt").map(String::from),
        max_pages: args
            .get("max_pages")
            .and_then(Value::as_u64)
            .map(|n| n as usize),
    })
}
