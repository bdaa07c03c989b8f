//! History command - list processed documents and their fields.

use clap::Args;
use console::style;

use formex_core::DocumentHistory;
use formex_core::models::DocumentStatus;

use super::extract::OutputFormat;
use super::{StoreArgs, load_config, with_service};

/// Arguments for the history command.
#[derive(Args)]
pub struct HistoryArgs {
    /// Number of recent documents to show
    #[arg(short, long, default_value = "20")]
    limit: usize,

    /// Show a single document with all its fields
    #[arg(long)]
    id: Option<i64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(flatten)]
    store: StoreArgs,
}

pub async fn run(args: HistoryArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);

    let (id, limit) = (args.id, args.limit);
    let entries = with_service(config, move |service| match id {
        Some(id) => {
            let entry = service
                .document(id)?
                .ok_or_else(|| anyhow::anyhow!("Document not found: {}", id))?;
            Ok(vec![entry])
        }
        None => Ok(service.history(limit)?),
    })
    .await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Csv => print!("{}", format_csv(&entries)?),
        OutputFormat::Text => print_text(&entries, args.id.is_some()),
    }

    Ok(())
}

fn format_csv(entries: &[DocumentHistory]) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "document_id",
        "filename",
        "form_type",
        "status",
        "uploaded_at",
        "field",
        "value",
        "confidence",
    ])?;

    for entry in entries {
        let doc = &entry.document;
        let id = doc.id.map(|id| id.to_string()).unwrap_or_default();
        let uploaded = doc.uploaded_at.to_rfc3339();

        if entry.fields.is_empty() {
            wtr.write_record([
                id.as_str(),
                doc.filename.as_str(),
                doc.form_type.as_str(),
                doc.status.as_str(),
                uploaded.as_str(),
                "",
                "",
                "",
            ])?;
        }
        for field in &entry.fields {
            let confidence = field.confidence.map(|c| format!("{c:.2}")).unwrap_or_default();
            wtr.write_record([
                id.as_str(),
                doc.filename.as_str(),
                doc.form_type.as_str(),
                doc.status.as_str(),
                uploaded.as_str(),
                field.field_name.as_str(),
                field.value.as_str(),
                confidence.as_str(),
            ])?;
        }
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn print_text(entries: &[DocumentHistory], detailed: bool) {
    if entries.is_empty() {
        println!("No documents processed yet.");
        return;
    }

    for entry in entries {
        let doc = &entry.document;
        let status = match doc.status {
            DocumentStatus::Completed => style(doc.status.as_str()).green(),
            DocumentStatus::Failed => style(doc.status.as_str()).red(),
            _ => style(doc.status.as_str()).yellow(),
        };
        let found = entry.fields.iter().filter(|f| f.is_found()).count();

        println!(
            "#{:<5} {}  {:<10} {} [{}] {}/{} fields",
            doc.id.unwrap_or_default(),
            doc.uploaded_at.format("%Y-%m-%d %H:%M"),
            status,
            doc.filename,
            doc.form_type,
            found,
            entry.fields.len()
        );

        if let Some(error) = &doc.error_message {
            println!("       {}", style(error).dim());
        }

        if detailed {
            for field in &entry.fields {
                let confidence = field
                    .confidence
                    .map(|c| format!(" ({:.0}%)", c * 100.0))
                    .unwrap_or_default();
                println!("       {}: {}{}", field.field_name, field.value, confidence);
                if let Some(justification) = &field.justification {
                    println!("         {}", style(justification).dim());
                }
            }
        }
    }
}
