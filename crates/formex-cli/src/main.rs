//! CLI application for LLM-backed PDF form extraction.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{batch, config, extract, history, info, models, templates};

/// formex - Extract structured fields from PDF forms with a language model
#[derive(Parser)]
#[command(name = "formex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract fields from a single PDF
    Extract(extract::ExtractArgs),

    /// Extract fields from every PDF matching a pattern
    Batch(batch::BatchArgs),

    /// Show page count, size and metadata of a PDF
    Info(info::InfoArgs),

    /// Show previously processed documents
    History(history::HistoryArgs),

    /// Manage extraction templates
    Templates(templates::TemplatesArgs),

    /// List models offered by the API
    Models(models::ModelsArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Extract(args) => extract::run(args, config_path).await,
        Commands::Batch(args) => batch::run(args, config_path).await,
        Commands::Info(args) => info::run(args, config_path).await,
        Commands::History(args) => history::run(args, config_path).await,
        Commands::Templates(args) => templates::run(args, config_path).await,
        Commands::Models(args) => models::run(args, config_path).await,
        Commands::Config(args) => config::run(args, config_path).await,
    }
}
