//! Configuration Loader
//!
//! Environment-aware loading on top of the `config` crate. Sources, later
//! ones winning:
//!
//! 1. `<dir>/broadcaster.toml`
//! 2. `<dir>/broadcaster.<environment>.toml`
//! 3. `BROADCASTER__*` environment variables, `__` separating nested keys
//!    (`BROADCASTER__RATE_LIMIT__MAX_CALLS_PER_SECOND=20`)
//!
//! Missing files are skipped; whatever is not set anywhere keeps its default.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::BroadcasterConfig;

const BASE_FILE: &str = "broadcaster";
const ENV_PREFIX: &str = "BROADCASTER";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: BroadcasterConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load with an explicit environment name, reading overrides from the
    /// process environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(config_dir, environment, None)
    }

    /// Load with an explicit set of override variables instead of the
    /// process environment. Keys use the `BROADCASTER__*` form.
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        overrides: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(config_dir, environment, Some(overrides))
    }

    fn build(
        config_dir: Option<PathBuf>,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        let base_path = config_directory.join(format!("{BASE_FILE}.toml"));
        let env_path = config_directory.join(format!("{BASE_FILE}.{environment}.toml"));

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let env_source = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("retry.classification.retry_codes")
            .source(overrides);

        let raw = Config::builder()
            .add_source(File::new(&path_str(&base_path), FileFormat::Toml).required(false))
            .add_source(File::new(&path_str(&env_path), FileFormat::Toml).required(false))
            .add_source(env_source)
            .build()
            .map_err(|e| ConfigurationError::load_error(&config_directory, e))?;

        let config: BroadcasterConfig = raw
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_error(&config_directory, e))?;

        config.validate()?;

        info!(
            environment = environment,
            processes = config.processes,
            queue = %config.queue_name,
            durable = config.queue_options.database_url.is_some(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials masked, for logs and the CLI
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(url) = value
            .get_mut("queue_options")
            .and_then(|q| q.get_mut("database_url"))
        {
            if !url.is_null() {
                *url = serde_json::Value::String("[MASKED]".to_string());
            }
        }
        value
    }

    /// `BROADCASTER_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        env::var("BROADCASTER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// `BROADCASTER_CONFIG_DIR`, or `./config`
    fn default_config_directory() -> PathBuf {
        env::var("BROADCASTER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
