use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_MIN_NAME_LENGTH;
use crate::error::{MigrationError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub resolver: ResolverConfig,
    pub oracle: OracleConfig,
    pub logging: LoggingConfig,
    /// File the settings came from; `None` when running on defaults
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// SQLite file holding the legacy `MusicRecords` and `Documents` tables
    pub path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("legacy.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub path: PathBuf,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("concerts.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub corrections_path: PathBuf,
    pub min_name_length: usize,
    /// In batch mode, create persons known only by their family name
    pub allow_family_only: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            corrections_path: PathBuf::from("corrections.json"),
            min_name_length: DEFAULT_MIN_NAME_LENGTH,
            allow_family_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub enabled: bool,
    /// Base of an OpenAI-compatible API, without the `/chat/completions` suffix
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub system_prompt: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "ORACLE_API_KEY".to_string(),
            timeout_seconds: 60,
            system_prompt: "You are a classical music expert helping to clean up a concert archive."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment
    /// overrides are applied in both cases.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let mut config = Self::load(path)?;
            config.loaded_from = Some(path.to_path_buf());
            config
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = env::var("SOURCE_DB_PATH") {
            self.source.path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("DEST_DB_PATH") {
            self.destination.path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("CORRECTIONS_PATH") {
            self.resolver.corrections_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolver.min_name_length == 0 {
            return Err(MigrationError::Config(
                "resolver.min_name_length must be at least 1".to_string(),
            ));
        }
        if self.source.path == self.destination.path {
            return Err(MigrationError::Config(
                "source and destination must be different databases".to_string(),
            ));
        }
        Ok(())
    }
}

impl OracleConfig {
    /// The API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        env::var(&self.api_key_env).map_err(|e| {
            MigrationError::Config(format!("Oracle API key '{}' not available: {}", self.api_key_env, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [destination]
            path = "out/new.db"

            [resolver]
            min_name_length = 3
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.destination.path, PathBuf::from("out/new.db"));
        assert_eq!(config.source.path, PathBuf::from("legacy.db"));
        assert_eq!(config.resolver.min_name_length, 3);
        assert!(config.resolver.allow_family_only);
        assert!(!config.oracle.enabled);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[resolver\nmin_name_length = ").unwrap();
        assert!(matches!(Config::load(&path), Err(MigrationError::Toml(_))));
    }

    #[test]
    fn test_load_or_default_records_origin() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(Config::load_or_default(&missing).unwrap().loaded_from, None);

        let path = dir.path().join("config.toml");
        fs::write(&path, "[logging]\ndir = \"var/log\"\n").unwrap();
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.loaded_from, Some(path));
        assert_eq!(config.logging.dir, PathBuf::from("var/log"));
    }

    #[test]
    fn test_validate_rejects_same_database() {
        let mut config = Config::default();
        config.destination.path = config.source.path.clone();
        assert!(config.validate().is_err());
    }
}
