//! Info command - show basic facts about a PDF.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use console::style;

use formex_core::pdf::{PdfExtractor, TextExtractor};

use super::load_config;

/// Arguments for the info command.
#[derive(Args)]
pub struct InfoArgs {
    /// Input PDF file
    #[arg(required = true)]
    input: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

pub async fn run(args: InfoArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let data = fs::read(&args.input)?;
    let extractor = PdfExtractor::from_config(&config.pdf);
    let info = extractor.info(&data)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File:  {}", args.input.display());
    println!("Pages: {}", info.page_count);
    println!("Size:  {} bytes", info.size);

    match extractor.validate(&data) {
        Ok(()) => println!("Check: {}", style("ok").green()),
        Err(e) => println!("Check: {}", style(e).yellow()),
    }

    if !info.metadata.is_empty() {
        println!();
        for (key, value) in &info.metadata {
            println!("{:<14} {}", format!("{key}:"), value);
        }
    }

    Ok(())
}
