mod chart;
mod config;
mod dashboard;
mod error;
mod export;
mod invoice;
mod llm_extract;
mod ocr_client;
mod pipeline;
mod response_parser;
mod server;

use clap::{Args, Parser, Subcommand};
use config::{Config, LlmBackend};
use llm_extract::LlmClient;
use ocr_client::OcrClient;
use pipeline::{Pipeline, Upload};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Personal finance dashboard: OCR scanned invoices and chart spend by category
#[derive(Parser)]
#[command(name = "invoice_dashboard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web dashboard (default)
    Serve,

    /// Process invoice images from disk and print the results
    Process(ProcessArgs),
}

#[derive(Args)]
struct ProcessArgs {
    /// Invoice images (jpg, jpeg, png)
    files: Vec<PathBuf>,

    /// Write all extracted rows to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Print the batch report as JSON instead of tables
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real environment variables win
    let _ = dotenvy::dotenv();

    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let cfg = Config::load_or_default(cli.config.as_deref())
        .inspect_err(|e| error!(error = %e, "Configuration error"))?;
    let secrets = cfg
        .resolve_secrets()
        .inspect_err(|e| error!(error = %e, "Configuration error"))?;

    let ocr = OcrClient::new(&cfg.ocr, secrets.ocr_api_key)?;
    let llm = LlmClient::new(&cfg.llm, secrets.llm_api_key.as_deref())?;

    if cfg.llm.backend == LlmBackend::Ollama && !llm.check_health().await {
        anyhow::bail!(
            "Ollama is not running at {}. Start it with: ollama serve",
            cfg.llm.ollama.base_url
        );
    }
    info!(model = %llm.model(), aggregation = ?cfg.report.aggregation, "Pipeline ready");

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(ocr),
        Arc::new(llm),
        cfg.report.aggregation,
    ));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => server::serve(&cfg.server, pipeline).await,
        Commands::Process(args) => run_process(args, &pipeline).await,
    }
}

async fn run_process(args: ProcessArgs, pipeline: &Pipeline) -> anyhow::Result<()> {
    let uploads = args.files.into_iter().map(Upload::from_path).collect();
    let report = pipeline.process_batch(uploads).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", dashboard::render_text(&report));
    }

    if let Some(path) = args.csv {
        let rows = report.summary.as_ref().map(|s| s.rows.as_slice()).unwrap_or(&[]);
        export::write_csv(&path, rows)?;
        info!(path = %path.display(), rows = rows.len(), "CSV written");
    }

    Ok(())
}
