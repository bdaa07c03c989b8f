//! Extract command - run the pipeline on a single PDF.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use formex_core::models::{
    ExtractionConfig, ExtractionRequest, ExtractionResult, FormexConfig, NOT_FOUND,
};
use formex_core::pdf::is_supported_file;
use formex_core::DefaultService;

use super::{StoreArgs, load_config, with_service};

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Input PDF file
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(flatten)]
    options: ExtractionOptions,

    #[command(flatten)]
    store: StoreArgs,
}

/// What to extract and with which model settings.
#[derive(Args, Clone, Debug)]
pub struct ExtractionOptions {
    /// Start from a stored template
    #[arg(short, long)]
    template: Option<String>,

    /// Field to extract (repeat or separate with commas)
    #[arg(short = 'F', long = "field", value_delimiter = ',')]
    fields: Vec<String>,

    /// Declared form type (defaults to the template name)
    #[arg(long)]
    form_type: Option<String>,

    /// Model identifier
    #[arg(short, long)]
    model: Option<String>,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(long)]
    temperature: Option<f32>,

    /// Completion token budget (100 - 4000)
    #[arg(long)]
    max_tokens: Option<u32>,
}

impl ExtractionOptions {
    /// Build the request configuration, resolving the template from the store.
    pub fn resolve(
        &self,
        service: &DefaultService,
        config: &FormexConfig,
    ) -> anyhow::Result<ExtractionConfig> {
        let mut extraction = match &self.template {
            Some(name) => {
                let template = service.template(name)?.ok_or_else(|| {
                    anyhow::anyhow!(
                        "Template not found: {}. Run 'formex templates list' to see available templates.",
                        name
                    )
                })?;
                ExtractionConfig::from_template(&template, config)
                    .with_extra_fields(self.fields.iter().cloned())
            }
            None => ExtractionConfig::new("general", self.fields.iter().cloned(), config),
        };

        if let Some(form_type) = &self.form_type {
            extraction.form_type = form_type.clone();
        }
        if let Some(model) = &self.model {
            extraction = extraction.with_model(model.clone());
        }
        if let Some(temperature) = self.temperature {
            extraction = extraction.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            extraction = extraction.with_max_tokens(max_tokens);
        }

        Ok(extraction)
    }
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
        }
    }
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    let filename = args
        .input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf")
        .to_string();
    if !is_supported_file(&filename) {
        anyhow::bail!("Unsupported file format: {} (expected a PDF)", filename);
    }

    let data = fs::read(&args.input)?;
    info!("Processing file: {} ({} bytes)", args.input.display(), data.len());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!("Extracting fields from {filename}..."));
    pb.enable_steady_tick(Duration::from_millis(120));

    let options = args.options.clone();
    let result = with_service(config.clone(), move |service| {
        let extraction = options.resolve(service, &config)?;
        Ok(service.process(ExtractionRequest::new(data, filename, extraction)))
    })
    .await;
    pb.finish_and_clear();
    let result = result?;

    let output = format_result(&result, args.format)?;
    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        eprintln!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    if !result.success {
        anyhow::bail!(
            "Extraction failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    eprintln!(
        "{} {} of {} fields found in {:.1}s",
        style("ℹ").blue(),
        result.fields.iter().filter(|f| f.is_found()).count(),
        result.fields.len(),
        result.elapsed.as_secs_f32()
    );

    Ok(())
}

/// Render a result in the requested format.
pub fn format_result(result: &ExtractionResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Csv => format_result_csv(result),
        OutputFormat::Text => Ok(format_result_text(result)),
    }
}

fn format_result_csv(result: &ExtractionResult) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(["field", "value", "confidence", "justification"])?;
    for field in &result.fields {
        let confidence = field.confidence.map(|c| format!("{c:.2}")).unwrap_or_default();
        wtr.write_record([
            field.field_name.as_str(),
            field.value.as_str(),
            confidence.as_str(),
            field.justification.as_deref().unwrap_or(""),
        ])?;
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_result_text(result: &ExtractionResult) -> String {
    let mut out = String::new();
    let doc = &result.document;

    out.push_str(&format!("Document: {}\n", doc.filename));
    if let Some(id) = doc.id {
        out.push_str(&format!("ID:       {}\n", id));
    }
    out.push_str(&format!("Form:     {}\n", doc.form_type));
    out.push_str(&format!("Status:   {}\n", doc.status));

    if let Some(error) = &result.error {
        out.push_str(&format!("Error:    {}\n", error));
        return out;
    }

    out.push('\n');
    let width = result
        .fields
        .iter()
        .map(|f| f.field_name.len())
        .max()
        .unwrap_or(0);

    for field in &result.fields {
        let confidence = field
            .confidence
            .map(|c| format!(" ({:.0}%)", c * 100.0))
            .unwrap_or_default();
        let value = if field.value == NOT_FOUND {
            style(field.value.as_str()).dim().to_string()
        } else {
            field.value.clone()
        };
        out.push_str(&format!(
            "{:width$}  {}{}\n",
            field.field_name,
            value,
            confidence,
            width = width
        ));
    }

    out
}
