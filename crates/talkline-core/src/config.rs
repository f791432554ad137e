use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pagination::Resolution;

const CONFIG_DIR_NAME: &str = "talkline";
const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_BASE_URL: &str = "https://pretalx.com/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Result returned by [`load_config`], capturing the source and any non-fatal issues.
#[derive(Debug, Clone)]
pub struct ConfigLoadResult {
    pub config: ClientConfig,
    pub warnings: Vec<String>,
    pub source: ConfigSource,
}

/// Indicates where the configuration was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// No usable configuration file was found; defaults were synthesized.
    Default,
    /// Configuration was read from a TOML file.
    File,
}

/// Settings for [`crate::client::PretalxClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "ClientConfig::default_api_version")]
    pub api_version: String,
    #[serde(default = "ClientConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "ClientConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub throttle: ThrottleSettings,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "ClientConfig::default_prepopulate_caches")]
    pub prepopulate_caches: bool,
    #[serde(default)]
    pub storage: StorageSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_version: Self::default_api_version(),
            base_url: Self::default_base_url(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            throttle: ThrottleSettings::default(),
            resolution: Resolution::default(),
            prepopulate_caches: true,
            storage: StorageSettings::default(),
        }
    }
}

impl ClientConfig {
    fn default_api_version() -> String {
        DEFAULT_API_VERSION.to_string()
    }

    fn default_base_url() -> String {
        DEFAULT_BASE_URL.to_string()
    }

    const fn default_timeout_secs() -> u64 {
        DEFAULT_TIMEOUT_SECS
    }

    const fn default_prepopulate_caches() -> bool {
        true
    }

    /// Overlay `PRETALX_*` environment variables onto this configuration.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| env::var(var).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |var: &str| {
            lookup(var)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(token) = lookup("PRETALX_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(version) = lookup("PRETALX_API_VERSION") {
            self.api_version = version;
        }
        if let Some(base_url) = lookup("PRETALX_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(raw) = lookup("PRETALX_TIMEOUT_SECS") {
            self.timeout_secs = parse_positive("PRETALX_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("PRETALX_THROTTLE_CALLS") {
            self.throttle.calls = parse_positive("PRETALX_THROTTLE_CALLS", &raw)?;
        }
        if let Some(raw) = lookup("PRETALX_THROTTLE_SECONDS") {
            self.throttle.seconds = parse_positive("PRETALX_THROTTLE_SECONDS", &raw)?;
        }
        Ok(())
    }
}

fn parse_env<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
        var: var.to_string(),
        reason: format!("{raw:?}: {err}"),
    })
}

/// Like [`parse_env`], but zero is rejected.
fn parse_positive<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value: T = parse_env(var, raw)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            var: var.to_string(),
            reason: format!("{raw:?}: must be at least 1"),
        });
    }
    Ok(value)
}

/// At most `calls` requests per `seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleSettings {
    #[serde(default = "ThrottleSettings::default_calls")]
    pub calls: u32,
    #[serde(default = "ThrottleSettings::default_seconds")]
    pub seconds: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            calls: Self::default_calls(),
            seconds: Self::default_seconds(),
        }
    }
}

impl ThrottleSettings {
    const fn default_calls() -> u32 {
        2
    }

    const fn default_seconds() -> u64 {
        1
    }
}

/// Where exported data is written. Only `local` is understood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "StorageSettings::default_provider")]
    pub provider: String,
    #[serde(default = "StorageSettings::default_local_path")]
    pub local_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            local_path: Self::default_local_path(),
        }
    }
}

impl StorageSettings {
    fn default_provider() -> String {
        "local".to_string()
    }

    fn default_local_path() -> String {
        ".".to_string()
    }
}

/// Path to the configuration directory.
pub fn config_directory() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Path to `config.toml`.
pub fn config_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Load the configuration from the default location, falling back to defaults.
pub fn load_config() -> ConfigLoadResult {
    load_config_from(&config_path())
}

/// Load the configuration from `path`. Unreadable or malformed files degrade to
/// defaults with a warning.
pub fn load_config_from(path: &Path) -> ConfigLoadResult {
    let mut warnings = Vec::new();

    if path.exists() {
        match read_config(path) {
            Ok(cfg) => {
                let (cfg, mut sanitize_warnings) = sanitize_config(cfg);
                warnings.append(&mut sanitize_warnings);
                return ConfigLoadResult {
                    config: cfg,
                    warnings,
                    source: ConfigSource::File,
                };
            }
            Err(err) => warnings.push(format!(
                "Failed to load {}: {}. Falling back to defaults.",
                path.display(),
                err
            )),
        }
    }

    ConfigLoadResult {
        config: ClientConfig::default(),
        warnings,
        source: ConfigSource::Default,
    }
}

fn read_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let raw = fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

fn sanitize_config(mut config: ClientConfig) -> (ClientConfig, Vec<String>) {
    let mut warnings = Vec::new();

    if config.api_version.trim().is_empty() {
        warnings.push(format!(
            "api_version is empty. Resetting to {DEFAULT_API_VERSION}."
        ));
        config.api_version = DEFAULT_API_VERSION.to_string();
    }

    if config.base_url.trim().is_empty() {
        warnings.push(format!("base_url is empty. Resetting to {DEFAULT_BASE_URL}."));
        config.base_url = DEFAULT_BASE_URL.to_string();
    } else if !config.base_url.ends_with('/') {
        config.base_url.push('/');
    }

    if let Some(token) = config.api_token.as_ref() {
        if token.trim().is_empty() {
            warnings.push("api_token is empty. Requests will be anonymous.".to_string());
            config.api_token = None;
        }
    }

    if config.timeout_secs == 0 {
        warnings.push(format!(
            "timeout_secs must be positive. Resetting to {DEFAULT_TIMEOUT_SECS}."
        ));
        config.timeout_secs = DEFAULT_TIMEOUT_SECS;
    }

    if config.throttle.calls == 0 {
        warnings.push("throttle.calls must be at least 1. Resetting to 1.".to_string());
        config.throttle.calls = 1;
    }
    if config.throttle.seconds == 0 {
        warnings.push("throttle.seconds must be at least 1. Resetting to 1.".to_string());
        config.throttle.seconds = 1;
    }

    (config, warnings)
}
