//! Templates command - list and create extraction templates.

use clap::{Args, Subcommand};
use console::style;

use formex_core::models::ExtractionTemplate;

use super::{StoreArgs, load_config, with_service};

/// Arguments for the templates command.
#[derive(Args)]
pub struct TemplatesArgs {
    #[command(subcommand)]
    command: TemplatesCommand,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Subcommand)]
enum TemplatesCommand {
    /// List stored templates
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Create a template
    Add(AddArgs),
}

#[derive(Args)]
struct AddArgs {
    /// Unique template name
    #[arg(short, long)]
    name: String,

    /// Description
    #[arg(short, long, default_value = "")]
    description: String,

    /// Field to extract (repeat or separate with commas)
    #[arg(short = 'F', long = "field", value_delimiter = ',', required = true)]
    fields: Vec<String>,

    /// Extra instructions passed to the model
    #[arg(long)]
    example_prompt: Option<String>,

    /// Validation rules as a JSON object keyed by field name
    #[arg(long)]
    rules: Option<String>,
}

pub async fn run(args: TemplatesArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);

    match args.command {
        TemplatesCommand::List { json } => {
            let templates = with_service(config, |service| Ok(service.templates()?)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&templates)?);
            } else {
                print_templates(&templates);
            }
        }
        TemplatesCommand::Add(add) => {
            let template = build_template(add)?;
            let name = template.name.clone();
            with_service(config, move |service| Ok(service.create_template(&template)?)).await?;
            println!("{} Created template '{}'", style("✓").green(), name);
        }
    }

    Ok(())
}

fn build_template(args: AddArgs) -> anyhow::Result<ExtractionTemplate> {
    let mut template = ExtractionTemplate::new(args.name, args.description, args.fields);
    template.example_prompt = args.example_prompt;

    if let Some(rules) = args.rules {
        template.validation_rules = serde_json::from_str(&rules)
            .map_err(|e| anyhow::anyhow!("--rules must be a JSON object: {}", e))?;
    }

    Ok(template)
}

fn print_templates(templates: &[ExtractionTemplate]) {
    if templates.is_empty() {
        println!("No templates defined.");
        return;
    }

    for template in templates {
        println!("{}", style(&template.name).bold());
        if !template.description.is_empty() {
            println!("  {}", template.description);
        }
        println!("  Fields: {}", template.fields.join(", "));
        if let Some(prompt) = &template.example_prompt {
            println!("  Prompt: {}", style(prompt).dim());
        }
        if !template.validation_rules.is_empty() {
            let keys: Vec<_> = template.validation_rules.keys().map(String::as_str).collect();
            println!("  Rules:  {}", keys.join(", "));
        }
        println!();
    }
}
