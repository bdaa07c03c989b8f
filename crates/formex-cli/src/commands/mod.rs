//! Subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod extract;
pub mod history;
pub mod info;
pub mod models;
pub mod templates;

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::debug;

use formex_core::models::FormexConfig;
use formex_core::{DefaultService, default_service};

/// Location of the user configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("formex")
        .join("config.json")
}

/// Load configuration from `path`, the default location, or built-in defaults.
pub fn load_config(path: Option<&str>) -> anyhow::Result<FormexConfig> {
    let config = match path {
        Some(path) => FormexConfig::from_file(Path::new(path))
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path, e))?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                debug!("Using config file {}", default_path.display());
                FormexConfig::from_file(&default_path)?
            } else {
                FormexConfig::default()
            }
        }
    };

    if let Err(errors) = config.validate() {
        anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
    }
    Ok(config)
}

/// Database location override shared by commands that open the store.
#[derive(Args, Clone, Debug, Default)]
pub struct StoreArgs {
    /// SQLite database path (overrides storage.database_path)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
}

impl StoreArgs {
    pub fn apply(&self, config: &mut FormexConfig) {
        if let Some(db) = &self.db {
            config.storage.database_path = db.clone();
        }
    }
}

/// Run `f` against the production service on the blocking thread pool.
///
/// The HTTP client is blocking, so the service is built, used and dropped
/// off the async runtime.
pub async fn with_service<T, F>(config: FormexConfig, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&DefaultService) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let service = default_service(&config)?;
        service.seed_default_templates()?;
        f(&service)
    })
    .await?
}
