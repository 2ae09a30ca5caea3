// Configuration File Support
//
// TOML configuration with environment variable overrides, loaded from the
// XDG config directory: ~/.config/scanrig/config.toml

use crate::orchestrator::{DEFAULT_MAX_CONCURRENT, MAX_CONCURRENT_LIMIT};
use crate::resolve::preset::{PresetConfig, PresetResolver};
use crate::tools::{
    ExecutorConfig, DEFAULT_KILL_GRACE_MS, DEFAULT_TIMEOUT_SECS, MAX_OUTPUT_SIZE, MAX_TIMEOUT_SECS,
    MIN_TIMEOUT_SECS,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Subprocess limits
    pub executor: ExecutorSettings,

    /// Batch scheduling
    pub orchestrator: OrchestratorSettings,

    /// `tool -> preset -> args`, plus an optional `global` section
    pub presets: PresetConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Subprocess limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Deadline for templates that set none
    pub default_timeout_secs: u64,

    /// Cap per captured output stream
    pub max_output_bytes: usize,

    /// Wait between SIGTERM and SIGKILL
    pub kill_grace_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_bytes: MAX_OUTPUT_SIZE,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
        }
    }
}

/// Batch scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Templates executing at once
    pub max_concurrent: usize,

    /// Wordlist used when automatic selection fails
    pub default_wordlist: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            default_wordlist: None,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// A missing file yields defaults (with environment overrides applied).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/scanrig/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "scanrig", "scanrig") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("scanrig").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// - SCANRIG_LOG_LEVEL
    /// - SCANRIG_LOG_FORMAT
    /// - SCANRIG_MAX_CONCURRENT (1-100)
    /// - SCANRIG_DEFAULT_TIMEOUT (1-300)
    /// - SCANRIG_DEFAULT_WORDLIST
    ///
    /// Out-of-range numbers are ignored.
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("SCANRIG_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SCANRIG_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(max) = std::env::var("SCANRIG_MAX_CONCURRENT") {
            if let Ok(max) = max.parse::<usize>() {
                if (1..=MAX_CONCURRENT_LIMIT).contains(&max) {
                    self.orchestrator.max_concurrent = max;
                }
            }
        }
        if let Ok(timeout) = std::env::var("SCANRIG_DEFAULT_TIMEOUT") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if (MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout) {
                    self.executor.default_timeout_secs = timeout;
                }
            }
        }
        if let Ok(path) = std::env::var("SCANRIG_DEFAULT_WORDLIST") {
            if !path.is_empty() {
                self.orchestrator.default_wordlist = Some(path);
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", self.logging.level),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!("Invalid log format: {}. Must be one of: json, pretty, compact", self.logging.format),
        }

        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.executor.default_timeout_secs) {
            anyhow::bail!(
                "Default timeout must be between {} and {} seconds",
                MIN_TIMEOUT_SECS,
                MAX_TIMEOUT_SECS
            );
        }
        if self.executor.max_output_bytes == 0 {
            anyhow::bail!("Max output bytes must be > 0");
        }

        if !(1..=MAX_CONCURRENT_LIMIT).contains(&self.orchestrator.max_concurrent) {
            anyhow::bail!("Max concurrent must be between 1 and {}", MAX_CONCURRENT_LIMIT);
        }
        if let Some(path) = &self.orchestrator.default_wordlist {
            crate::tools::check_wordlist_path(path).context("Invalid default wordlist")?;
        }

        Ok(())
    }

    /// Executor limits as runtime configuration
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_timeout(self.executor.default_timeout_secs)
            .with_max_output_size(self.executor.max_output_bytes)
            .with_kill_grace(Duration::from_millis(self.executor.kill_grace_ms))
    }

    /// Preset resolver over a copy of the configured presets
    pub fn preset_resolver(&self) -> PresetResolver {
        PresetResolver::new(self.presets.clone())
    }
}
