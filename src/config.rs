use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::assets::KindRegistry;
use crate::template::OutputMode;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub impact: ImpactConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Service-wide settings
#[derive(Debug, Clone, Deserialize)]
pub struct ImpactConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
}

/// Which entity kinds may take part in the impact graph
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_allowed_kinds")]
    pub allowed_kinds: Vec<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            allowed_kinds: default_allowed_kinds(),
        }
    }
}

/// Template rendering settings
#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default)]
    pub output_mode: OutputMode,
    #[serde(default = "default_parameters_cache_capacity")]
    pub parameters_cache_capacity: usize,
    #[serde(default = "default_max_value_depth")]
    pub max_value_depth: usize,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::default(),
            parameters_cache_capacity: default_parameters_cache_capacity(),
            max_value_depth: default_max_value_depth(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_allowed_kinds() -> Vec<String> {
    KindRegistry::builtin().graphable_kinds()
}

fn default_parameters_cache_capacity() -> usize {
    64
}

fn default_max_value_depth() -> usize {
    8
}

fn default_http_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in IMPACT_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // The .env file is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("IMPACT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_path(&config_path)
    }

    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.assets.allowed_kinds.is_empty() {
            anyhow::bail!("assets.allowed_kinds must list at least one kind");
        }

        let registry = KindRegistry::builtin();
        for kind in &self.assets.allowed_kinds {
            match registry.resolve(kind) {
                Some(descriptor) if descriptor.graphable => {}
                Some(_) => anyhow::bail!("assets.allowed_kinds: {} cannot be part of the impact graph", kind),
                None => anyhow::bail!("assets.allowed_kinds: unknown kind {}", kind),
            }
        }

        if self.templates.parameters_cache_capacity == 0 {
            anyhow::bail!("templates.parameters_cache_capacity must be greater than 0");
        }

        if self.templates.max_value_depth == 0 {
            anyhow::bail!("templates.max_value_depth must be greater than 0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.impact.db_path
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.impact.migrations_dir
    }
}
