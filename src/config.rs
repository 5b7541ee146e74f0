// ⚙️ Configuration - pipeline thresholds + runtime locations
//
// Loaded from environment variables or a JSON file. Malformed values never
// abort a run: they are logged and the default is used instead.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Tunables of the reconciliation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Allowed relative price deviation before a line is flagged (0.05 = 5%)
    pub price_tolerance: f64,

    /// Currency units within which two totals count as equal
    pub amount_epsilon: f64,

    /// Fuzzy suggestions at or above this score are "high" confidence
    pub high_confidence: f64,

    /// Fuzzy suggestions below this score are discarded
    pub medium_confidence: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            price_tolerance: 0.05,
            amount_epsilon: 0.01,
            high_confidence: 0.85,
            medium_confidence: 0.60,
        }
    }
}

impl PipelineConfig {
    /// Check the thresholds are usable.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.price_tolerance > 0.0) {
            return Err(format!(
                "price_tolerance must be positive, got {}",
                self.price_tolerance
            ));
        }
        if !(self.amount_epsilon >= 0.0) {
            return Err(format!(
                "amount_epsilon must not be negative, got {}",
                self.amount_epsilon
            ));
        }
        if !(0.0 < self.medium_confidence
            && self.medium_confidence < self.high_confidence
            && self.high_confidence <= 1.0)
        {
            return Err(format!(
                "confidence bands must satisfy 0 < medium < high <= 1, got {} / {}",
                self.medium_confidence, self.high_confidence
            ));
        }
        Ok(())
    }

    /// Return self if valid, otherwise the defaults (with a warning).
    pub fn or_default_if_invalid(self) -> Self {
        match self.validate() {
            Ok(()) => self,
            Err(reason) => {
                tracing::warn!(%reason, "invalid pipeline config, using defaults");
                PipelineConfig::default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Application configuration shared by the CLI and the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,

    /// Where the CSV dispatcher writes generated sales orders
    pub dispatch_dir: PathBuf,

    pub server: ServerConfig,

    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("orders.db"),
            dispatch_dir: PathBuf::from("sales_orders"),
            server: ServerConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = AppConfig::default();

        let pipeline = PipelineConfig {
            price_tolerance: env_parse("RECON_PRICE_TOLERANCE", defaults.pipeline.price_tolerance),
            amount_epsilon: env_parse("RECON_AMOUNT_EPSILON", defaults.pipeline.amount_epsilon),
            ..defaults.pipeline
        };

        AppConfig {
            database_path: std::env::var("RECON_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            dispatch_dir: std::env::var("RECON_DISPATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.dispatch_dir),
            server: ServerConfig {
                host: std::env::var("RECON_HOST").unwrap_or(defaults.server.host),
                port: env_parse("RECON_PORT", defaults.server.port),
            },
            pipeline: pipeline.or_default_if_invalid(),
        }
    }

    /// Load configuration from a JSON file (missing fields take defaults)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let mut config: AppConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;
        config.pipeline = config.pipeline.or_default_if_invalid();

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparsable config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
