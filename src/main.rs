use herald::analysis::AnalysisType;
use herald::cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "herald",
    version,
    about = "Announcement assistant with PDF attachment analysis"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Listen address (overrides gateway.addr)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Interactive console chat
    Chat,
    /// Send one message and print the reply
    Ask {
        /// Continue an existing session
        #[arg(long)]
        session: Option<String>,
        /// User message to send
        message: String,
    },
    /// Render a PDF's pages to PNG files
    Render {
        pdf: PathBuf,
        /// Output directory
        #[arg(long, default_value = "pdf_images")]
        out_dir: PathBuf,
        /// Rendering resolution (overrides analysis.dpi)
        #[arg(long)]
        dpi: Option<u32>,
    },
    /// Analyse a local PDF with the vision model
    Analyze {
        pdf: PathBuf,
        /// summarize, extract_action_items, sentiment or custom
        #[arg(long = "type", default_value = "summarize")]
        analysis_type: AnalysisType,
        /// Custom instructions (overrides --type)
        #[arg(long)]
        prompt: Option<String>,
        /// Number of pages to send
        #[arg(long)]
        max_pages: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(herald::utils::default_config_path);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Serve { addr } => cli::serve(&config_path, addr.as_deref()).await,
        Command::Chat => cli::chat(&config_path).await,
        Command::Ask { session, message } => {
            cli::ask(&config_path, session.as_deref(), &message).await
        }
        Command::Render { pdf, out_dir, dpi } => {
            cli::render(&config_path, &pdf, &out_dir, dpi).await
        }
        Command::Analyze {
            pdf,
            analysis_type,
            prompt,
            max_pages,
        } => cli::analyze(&config_path, &pdf, analysis_type, prompt, max_pages).await,
    }
}
