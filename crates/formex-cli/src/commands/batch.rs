//! Batch command - run the pipeline over many PDFs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, warn};

use formex_core::models::{ExtractionRequest, ExtractionResult};
use formex_core::pdf::is_supported_file;

use super::extract::{ExtractionOptions, OutputFormat, format_result};
use super::{StoreArgs, load_config, with_service};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Glob pattern of input files
    #[arg(required = true)]
    input: String,

    /// Output directory for per-file results
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Continue after a failed document
    #[arg(long)]
    continue_on_error: bool,

    #[command(flatten)]
    options: ExtractionOptions,

    #[command(flatten)]
    store: StoreArgs,
}

/// Outcome for one input file.
struct FileResult {
    path: PathBuf,
    result: Option<ExtractionResult>,
    error: Option<String>,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| p.to_str().is_some_and(is_supported_file))
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching PDF files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    let options = args.options.clone();
    let continue_on_error = args.continue_on_error;
    let progress = pb.clone();
    let results = with_service(config.clone(), move |service| {
        let extraction = options.resolve(service, &config)?;
        let mut results = Vec::with_capacity(files.len());

        for path in files {
            let outcome = read_and_process(&path, |data, filename| {
                service.process(ExtractionRequest::new(data, filename, extraction.clone()))
            });
            progress.inc(1);

            let error = match &outcome {
                Ok(result) if result.success => None,
                Ok(result) => result.error.clone(),
                Err(e) => Some(e.to_string()),
            };

            if let Some(message) = &error {
                if !continue_on_error {
                    error!("Failed to process {}: {}", path.display(), message);
                    anyhow::bail!("Processing failed for {}: {}", path.display(), message);
                }
                warn!("Failed to process {}: {}", path.display(), message);
            }

            results.push(FileResult {
                path,
                result: outcome.ok(),
                error,
            });
        }

        Ok(results)
    })
    .await;
    pb.finish_and_clear();
    let results = results?;

    if let Some(output_dir) = &args.output_dir {
        for file in &results {
            let Some(result) = file.result.as_ref().filter(|r| r.success) else {
                continue;
            };
            let stem = file
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document");
            let output_path = output_dir.join(format!("{}.{}", stem, args.format.extension()));

            fs::write(&output_path, format_result(result, args.format)?)?;
            debug!("Wrote output to {}", output_path.display());
        }
    }

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} failed",
        style(results.len() - failed.len()).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for file in &failed {
            println!(
                "  - {}: {}",
                file.path.display(),
                file.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

fn read_and_process(
    path: &Path,
    process: impl FnOnce(Vec<u8>, String) -> ExtractionResult,
) -> anyhow::Result<ExtractionResult> {
    let data = fs::read(path)?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf")
        .to_string();
    Ok(process(data, filename))
}

fn write_summary(path: &Path, results: &[FileResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "document_id",
        "fields_found",
        "fields_total",
        "processing_time_ms",
        "error",
    ])?;

    for file in results {
        let filename = file.path.file_name().and_then(|s| s.to_str()).unwrap_or("");

        match &file.result {
            Some(result) => {
                let found = result.fields.iter().filter(|f| f.is_found()).count();
                let id = result.document.id.map(|id| id.to_string()).unwrap_or_default();
                wtr.write_record([
                    filename.to_string(),
                    result.document.status.as_str().to_string(),
                    id,
                    found.to_string(),
                    result.fields.len().to_string(),
                    result.elapsed.as_millis().to_string(),
                    file.error.clone().unwrap_or_default(),
                ])?;
            }
            None => {
                wtr.write_record([
                    filename,
                    "error",
                    "",
                    "",
                    "",
                    "",
                    file.error.as_deref().unwrap_or(""),
                ])?;
            }
        }
    }

    wtr.flush()?;
    Ok(())
}
