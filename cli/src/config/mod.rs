use crate::error::{AppError, AppResult};
use config::{Config, Environment, File};
use serde::Deserialize;
use server::bulk_operations::BatchConfig;
use server::files::OutputSettings;
use std::path::PathBuf;

/// Base name of the optional configuration file in the working directory.
pub const CONFIG_FILE: &str = "sb-shovel";

/// Prefix of configuration environment variables, e.g.
/// `SB_SHOVEL__BULK__CONCURRENCY=8`.
pub const ENV_PREFIX: &str = "SB_SHOVEL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    bulk: BatchConfig,
    #[serde(default)]
    output: OutputSettings,
    #[serde(default)]
    store: StoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    level: Option<String>,
    file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    path: Option<PathBuf>,
}

impl AppConfig {
    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    pub fn bulk(&self) -> &BatchConfig {
        &self.bulk
    }

    pub fn output(&self) -> &OutputSettings {
        &self.output
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }
}

impl LoggingConfig {
    /// Defaults to `warn` so operator output stays readable.
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("warn")
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }
}

impl StoreConfig {
    /// Location of the saved-connection store.
    pub fn path(&self) -> AppResult<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join("sb-shovel").join("connections"))
            .ok_or_else(|| {
                AppError::Config(
                    "cannot determine a config directory, set store.path in sb-shovel.toml"
                        .to_string(),
                )
            })
    }
}

/// Loads `sb-shovel.toml` (optional), `.env` and `SB_SHOVEL__*` variables.
pub fn load_config() -> AppResult<AppConfig> {
    dotenv::dotenv().ok();
    load_from(CONFIG_FILE)
}

/// Loads configuration from the file `name` (any supported extension, may be
/// missing) overlaid with environment variables.
pub fn load_from(name: &str) -> AppResult<AppConfig> {
    let env_source = Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true);

    let config = Config::builder()
        .add_source(File::with_name(name).required(false))
        .add_source(env_source)
        .build()
        .map_err(|e| {
            AppError::Config(format!(
                "Configuration loading failed: {e}. Please check {name}.toml and environment variables."
            ))
        })?;

    config
        .try_deserialize::<AppConfig>()
        .map_err(|e| AppError::Config(format!("Failed to deserialize config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::assert_ok;
    use std::time::Duration;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("absent");

        let config = assert_ok!(load_from(name.to_str().unwrap()));
        assert_eq!(config.logging().level(), "warn");
        assert_eq!(config.logging().file(), None);
        assert_eq!(config.bulk(), &BatchConfig::default());
        assert_eq!(
            config.output().directory(),
            PathBuf::from("sb-shovel-output")
        );
    }

    #[test]
    fn test_file_sections_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("shovel.toml"),
            r#"
[logging]
level = "debug"
file = "shovel.log"

[bulk]
concurrency = 8
throttle_delay_ms = 100

[output]
directory = "dumps"
prefix = "orders_"

[store]
path = "/tmp/connections"
"#,
        )
        .unwrap();
        let name = dir.path().join("shovel");

        let config = assert_ok!(load_from(name.to_str().unwrap()));
        assert_eq!(config.logging().level(), "debug");
        assert_eq!(config.logging().file(), Some("shovel.log"));
        assert_eq!(config.bulk().concurrency(), 8);
        assert_eq!(config.bulk().status_interval(), 50);
        assert_eq!(config.bulk().throttle_delay(), Duration::from_millis(100));
        assert_eq!(
            config.output().batch_path(2),
            PathBuf::from("dumps").join("orders_000002.txt")
        );
        assert_eq!(
            config.store().path().unwrap(),
            PathBuf::from("/tmp/connections")
        );
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.toml"), "[bulk\nconcurrency = ").unwrap();
        let name = dir.path().join("broken");

        let err = load_from(name.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
