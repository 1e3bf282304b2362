//! CLI subcommand handlers.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the logic lives here.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::analysis::{AnalysisRequest, AnalysisType, PopplerRenderer};
use crate::config::Config;
use crate::gateway;
use crate::runtime::{self, Runtime};

// ── Serve ────────────────────────────────────────────────────────────────────

/// Run the HTTP gateway until Ctrl-C.
pub async fn serve(config_path: &Path, addr_override: Option<&str>) -> anyhow::Result<()> {
    let cfg = Config::load(config_path).await?;
    let addr_str = addr_override.unwrap_or(&cfg.gateway.addr);
    let addr: SocketAddr = addr_str
        .parse()
        .with_context(|| format!("invalid listen address: {addr_str}"))?;

    let runtime = Arc::new(Runtime::from_config(&cfg)?);
    let cancel = CancellationToken::new();
    let janitor = runtime.spawn_janitor(cancel.clone());
    let gw = gateway::start_gateway(addr, runtime.clone(), cancel.clone())
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!("herald v{} listening on http://{}", env!("CARGO_PKG_VERSION"), gw.addr);
    println!("  tools: {}", runtime.tool_names().join(", "));

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down");

    cancel.cancel();
    let _ = gw.handle.await;
    let _ = janitor.await;

    info!("shutdown complete");
    Ok(())
}

// ── Chat ─────────────────────────────────────────────────────────────────────

/// Interactive console loop.  One session for the whole run; `exit` or
/// `quit` ends it.
pub async fn chat(config_path: &Path) -> anyhow::Result<()> {
    let cfg = Config::load(config_path).await?;
    let runtime = Runtime::from_config(&cfg)?;

    println!("herald v{}. Type 'exit' or 'quit' to leave.", env!("CARGO_PKG_VERSION"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut session_id: Option<String> = None;

    loop {
        stdout.write_all(b"\nYou: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        match runtime.turn(session_id.as_deref(), message).await {
            Ok(report) => {
                session_id = Some(report.session_id);
                println!("\nAssistant: {}", report.reply);
            }
            Err(failure) => {
                if failure.session_id.is_some() {
                    session_id = failure.session_id.clone();
                }
                eprintln!("\nError [{}]: {}", failure.error.kind(), failure.error);
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}

/// Run a single turn and print the reply.
pub async fn ask(config_path: &Path, session: Option<&str>, message: &str) -> anyhow::Result<()> {
    let cfg = Config::load(config_path).await?;
    let runtime = Runtime::from_config(&cfg)?;

    let report = runtime.turn(session, message).await?;
    println!("{}", report.reply);
    eprintln!(
        "session={} model_calls={} tool_calls={}",
        report.session_id,
        report.model_calls,
        report.tool_calls.len()
    );
    Ok(())
}

// ── Documents ────────────────────────────────────────────────────────────────

/// Render every page of a PDF into `out_dir`.
pub async fn render(
    config_path: &Path,
    pdf: &Path,
    out_dir: &Path,
    dpi: Option<u32>,
) -> anyhow::Result<()> {
    let mut cfg = Config::load(config_path).await?;
    if let Some(dpi) = dpi {
        cfg.analysis.dpi = dpi;
    }
    let renderer = PopplerRenderer::from_config(&cfg.analysis, &cfg.scratch_dir());

    let written = renderer.convert_to_dir(pdf, out_dir).await?;
    for path in &written {
        println!("{}", path.display());
    }
    println!("Converted {} page(s) to PNG in {}", written.len(), out_dir.display());
    Ok(())
}

/// Analyse a local PDF with the vision model.
pub async fn analyze(
    config_path: &Path,
    pdf: &Path,
    analysis_type: AnalysisType,
    prompt: Option<String>,
    max_pages: Option<usize>,
) -> anyhow::Result<()> {
    let cfg = Config::load(config_path).await?;
    let analyzer = runtime::build_analyzer(&cfg)?;

    let request = AnalysisRequest {
        path: pdf.to_path_buf(),
        analysis_type,
        custom_prompt: prompt,
        max_pages,
    };
    let analysis = analyzer.analyze(&request).await?;
    println!("{analysis}");
    Ok(())
}
