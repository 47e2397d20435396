//! Configuration loader for stepwise.
//!
//! Reads `config.toml` from the data directory (`~/.stepwise/` by default)
//! and deserializes it into [`StepwiseConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::{Path, PathBuf};

use stepwise_types::config::StepwiseConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "STEPWISE_DATA_DIR";

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`StepwiseConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> StepwiseConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return StepwiseConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return StepwiseConfig::default();
        }
    };

    match toml::from_str::<StepwiseConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            StepwiseConfig::default()
        }
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `STEPWISE_DATA_DIR` environment variable
/// 2. `~/.stepwise`
/// 3. `./.stepwise`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".stepwise");
    }

    PathBuf::from(".stepwise")
}

/// Directory holding persisted plans: `{data_dir}/plans`.
pub fn plans_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("plans")
}
