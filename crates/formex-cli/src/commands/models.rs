//! Models command - list models offered by the chat API.

use clap::Args;
use console::style;
use tracing::warn;

use formex_core::LanguageModel;
use formex_core::llm::openai_client;

use super::load_config;

/// Shown when the API cannot be reached.
const FALLBACK_MODELS: &[&str] = &["gpt-5-nano", "gpt-5-mini", "gpt-5"];

/// Arguments for the models command.
#[derive(Args)]
pub struct ModelsArgs {
    /// Include non-chat models
    #[arg(long)]
    all: bool,
}

pub async fn run(args: ModelsArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let default_model = config.llm.default_model.clone();

    let listed = tokio::task::spawn_blocking(move || {
        let client = openai_client(&config.llm)?;
        Ok::<_, anyhow::Error>(client.list_models()?)
    })
    .await?;

    let models = match listed {
        Ok(models) => models
            .into_iter()
            .filter(|m| args.all || m.contains("gpt"))
            .collect::<Vec<_>>(),
        Err(e) => {
            warn!("Failed to list models: {}", e);
            eprintln!(
                "{} Could not reach the model API ({}), showing common models.",
                style("!").yellow(),
                e
            );
            FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
        }
    };

    for model in &models {
        if *model == default_model {
            println!("{} {}", model, style("(default)").green());
        } else {
            println!("{}", model);
        }
    }

    Ok(())
}
