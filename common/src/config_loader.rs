//! Layered settings loader.
//!
//! Precedence (later layers override earlier ones):
//! 1. Built-in defaults
//! 2. `settings.toml` in the product config directory
//! 3. `VIBECODR_*` environment variables
//!
//! ```no_run
//! use vibecodr_common::SettingsLoader;
//!
//! let settings = SettingsLoader::new().load()?;
//! println!("publishing to {}", settings.api_base);
//! # Ok::<(), vibecodr_common::ConfigLoadError>(())
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::{DEFAULT_API_BASE, DEFAULT_PLAYER_BASE, product_config_dir};

const SETTINGS_FILE: &str = "settings.toml";
const DEFAULT_ENV_PREFIX: &str = "VIBECODR";

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: String,
    },
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Platform API base URL.
    pub api_base: String,
    /// Player site base URL used to build result links.
    pub player_base: String,
    /// Credential file override; `None` means the default location.
    pub credentials_path: Option<PathBuf>,
    /// Upper bound for one resilient call, retries included.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First backoff delay; doubled on each retry.
    pub base_delay_ms: u64,
    /// Minimum remaining platform-token lifetime accepted without refresh.
    pub min_valid_seconds: u64,
    /// Origins trusted with a bearer token in addition to the built-in set.
    pub extra_api_origins: Vec<String>,
    pub extra_player_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            player_base: DEFAULT_PLAYER_BASE.to_string(),
            credentials_path: None,
            timeout_ms: 30_000,
            max_retries: 3,
            base_delay_ms: 1_000,
            min_valid_seconds: 60,
            extra_api_origins: Vec::new(),
            extra_player_origins: Vec::new(),
        }
    }
}

/// On-disk representation; every field is optional so the file can be sparse.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    api_base: Option<String>,
    player_base: Option<String>,
    credentials_path: Option<PathBuf>,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    min_valid_seconds: Option<u64>,
    extra_api_origins: Option<Vec<String>>,
    extra_player_origins: Option<Vec<String>>,
}

/// Builder for layered settings loading.
pub struct SettingsLoader {
    config_dir: Option<PathBuf>,
    env_prefix: String,
    skip_file: bool,
    skip_env: bool,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self {
            config_dir: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            skip_file: false,
            skip_env: false,
        }
    }

    /// Read `settings.toml` from `dir` instead of the product config directory.
    pub fn with_config_dir(mut self, dir: PathBuf) -> Self {
        self.config_dir = Some(dir);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn skip_file_layer(mut self) -> Self {
        self.skip_file = true;
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load settings from the process environment.
    pub fn load(self) -> Result<Settings, ConfigLoadError> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Load settings using `lookup` for environment variables.
    pub fn load_with_env<F>(self, lookup: F) -> Result<Settings, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if !self.skip_file
            && let Some(dir) = self.config_dir.clone().or_else(product_config_dir)
        {
            let file = Self::load_from_file(&dir.join(SETTINGS_FILE))?;
            Self::merge_file(&mut settings, file);
        }

        if !self.skip_env {
            Self::apply_env_overrides(&mut settings, &self.env_prefix, lookup)?;
        }

        Ok(settings)
    }

    fn load_from_file(path: &Path) -> Result<SettingsFile, ConfigLoadError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "settings file not found, using defaults");
                return Ok(SettingsFile::default());
            }
            Err(source) => {
                return Err(ConfigLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        toml::from_str(&contents).map_err(|source| ConfigLoadError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    fn merge_file(base: &mut Settings, file: SettingsFile) {
        if let Some(v) = file.api_base {
            base.api_base = v;
        }
        if let Some(v) = file.player_base {
            base.player_base = v;
        }
        if file.credentials_path.is_some() {
            base.credentials_path = file.credentials_path;
        }
        if let Some(v) = file.timeout_ms {
            base.timeout_ms = v;
        }
        if let Some(v) = file.max_retries {
            base.max_retries = v;
        }
        if let Some(v) = file.base_delay_ms {
            base.base_delay_ms = v;
        }
        if let Some(v) = file.min_valid_seconds {
            base.min_valid_seconds = v;
        }
        if let Some(v) = file.extra_api_origins {
            base.extra_api_origins = v;
        }
        if let Some(v) = file.extra_player_origins {
            base.extra_player_origins = v;
        }
    }

    fn apply_env_overrides<F>(
        settings: &mut Settings,
        prefix: &str,
        lookup: F,
    ) -> Result<(), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| -> Option<(String, String)> {
            let var = format!("{prefix}_{name}");
            let value = lookup(&var)?;
            if value.trim().is_empty() {
                None
            } else {
                tracing::debug!("Applying env override: {var}");
                Some((var, value))
            }
        };

        if let Some((_, value)) = get("API_BASE") {
            settings.api_base = value.trim().to_string();
        }
        if let Some((_, value)) = get("PLAYER_BASE") {
            settings.player_base = value.trim().to_string();
        }
        if let Some((_, value)) = get("CONFIG_PATH") {
            settings.credentials_path = Some(PathBuf::from(value.trim()));
        }
        if let Some((var, value)) = get("TIMEOUT_MS") {
            settings.timeout_ms = parse_number(var, value)?;
        }
        if let Some((var, value)) = get("MAX_RETRIES") {
            settings.max_retries = parse_number(var, value)?;
        }
        if let Some((var, value)) = get("BASE_DELAY_MS") {
            settings.base_delay_ms = parse_number(var, value)?;
        }
        if let Some((var, value)) = get("MIN_VALID_SECONDS") {
            settings.min_valid_seconds = parse_number(var, value)?;
        }
        if let Some((_, value)) = get("EXTRA_API_ORIGINS") {
            settings.extra_api_origins = split_list(&value);
        }
        if let Some((_, value)) = get("EXTRA_PLAYER_ORIGINS") {
            settings.extra_player_origins = split_list(&value);
        }

        Ok(())
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number<T: std::str::FromStr>(var: String, value: String) -> Result<T, ConfigLoadError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigLoadError::InvalidEnvValue {
            var,
            value,
            expected: "a non-negative integer".to_string(),
        })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
