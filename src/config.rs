/*!
 * Configuration support for the claims pipeline
 *
 * Provides the aggregation policies and runtime options that shape a run.
 */

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_TOP_CHAINS, DEFAULT_TOP_QUANTITIES};
use crate::ExportFormat;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How the `price` field of a claim is interpreted
    #[serde(default)]
    pub price_basis: PriceBasis,

    /// What happens to claims whose pharmacy is not in the pharmacy data
    #[serde(default)]
    pub unknown_pharmacy_policy: UnknownPharmacyPolicy,

    /// Whether to skip malformed files and records (false = fail on the first one)
    #[serde(default = "default_skip_invalid_records")]
    pub skip_invalid_records: bool,

    /// Whether to show a progress bar while reading files
    #[serde(default)]
    pub enable_progress_bar: bool,

    /// Report file format
    #[serde(default)]
    pub output_format: ExportFormat,

    /// Whether to pretty-print JSON reports
    #[serde(default = "default_pretty_print")]
    pub pretty_print: bool,

    /// Chains kept per drug in the recommendation report
    #[serde(default = "default_top_chains")]
    pub top_chains: usize,

    /// Quantities kept per drug in the quantity report
    #[serde(default = "default_top_quantities")]
    pub top_quantities: usize,
}

/// Interpretation of a claim's `price`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceBasis {
    /// `price` is per unit; the claim total is `price * quantity`
    #[default]
    Unit,
    /// `price` is the claim total; the unit price is `price / quantity`
    Total,
}

impl PriceBasis {
    /// Unit price and line total of a priced claim
    pub fn split(&self, price: f64, quantity: f64) -> (f64, f64) {
        match self {
            PriceBasis::Unit => (price, price * quantity),
            PriceBasis::Total => (price / quantity, price),
        }
    }
}

/// Treatment of claims that reference an unknown pharmacy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPharmacyPolicy {
    /// Remove them before any aggregation
    #[default]
    Drop,
    /// Keep them for metrics and quantities; never for chain rankings
    Retain,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            price_basis: PriceBasis::Unit,
            unknown_pharmacy_policy: UnknownPharmacyPolicy::Drop,
            skip_invalid_records: default_skip_invalid_records(),
            enable_progress_bar: false,
            output_format: ExportFormat::Json,
            pretty_print: default_pretty_print(),
            top_chains: default_top_chains(),
            top_quantities: default_top_quantities(),
        }
    }
}

// Default value functions for serde
fn default_skip_invalid_records() -> bool {
    true
}

fn default_pretty_print() -> bool {
    true
}

fn default_top_chains() -> usize {
    DEFAULT_TOP_CHAINS
}

fn default_top_quantities() -> usize {
    DEFAULT_TOP_QUANTITIES
}

impl PipelineConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - `PHARMA_METRICS_PRICE_BASIS`: "unit" or "total"
    /// - `PHARMA_METRICS_UNKNOWN_PHARMACIES`: "drop" or "retain"
    /// - `PHARMA_METRICS_SKIP_INVALID`: "true" or "false"
    /// - `PHARMA_METRICS_PROGRESS_BAR`: "true" or "false"
    /// - `PHARMA_METRICS_FORMAT`: "json" or "csv"
    /// - `PHARMA_METRICS_PRETTY`: "true" or "false"
    /// - `PHARMA_METRICS_TOP_CHAINS`: number
    /// - `PHARMA_METRICS_TOP_QUANTITIES`: number
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("PHARMA_METRICS_PRICE_BASIS") {
            config.price_basis = match val.to_lowercase().as_str() {
                "total" => PriceBasis::Total,
                _ => PriceBasis::Unit,
            };
        }

        if let Some(val) = lookup("PHARMA_METRICS_UNKNOWN_PHARMACIES") {
            config.unknown_pharmacy_policy = match val.to_lowercase().as_str() {
                "retain" => UnknownPharmacyPolicy::Retain,
                _ => UnknownPharmacyPolicy::Drop,
            };
        }

        if let Some(val) = lookup("PHARMA_METRICS_SKIP_INVALID") {
            config.skip_invalid_records = val.to_lowercase() == "true";
        }

        if let Some(val) = lookup("PHARMA_METRICS_PROGRESS_BAR") {
            config.enable_progress_bar = val.to_lowercase() == "true";
        }

        if let Some(val) = lookup("PHARMA_METRICS_FORMAT") {
            config.output_format = match val.to_lowercase().as_str() {
                "csv" => ExportFormat::Csv,
                _ => ExportFormat::Json,
            };
        }

        if let Some(val) = lookup("PHARMA_METRICS_PRETTY") {
            config.pretty_print = val.to_lowercase() == "true";
        }

        if let Some(val) = lookup("PHARMA_METRICS_TOP_CHAINS") {
            if let Ok(n) = val.parse() {
                config.top_chains = n;
            }
        }

        if let Some(val) = lookup("PHARMA_METRICS_TOP_QUANTITIES") {
            if let Ok(n) = val.parse() {
                config.top_quantities = n;
            }
        }

        config
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| crate::PipelineError::Configuration {
                message: format!("Failed to parse config file: {}", e),
                suggestion: Some("Check that the file is valid TOML format".to_string()),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/pharmacy-metrics/config.toml` on Linux
    /// or `%APPDATA%\pharmacy-metrics\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "pharmacy-metrics")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location, environment, or defaults
    ///
    /// Priority order:
    /// 1. Default config file (if exists)
    /// 2. Environment variables
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Some(config_path) = Self::default_config_path() {
            if config_path.exists() {
                match Self::from_file(&config_path) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("Ignoring config file {}: {}", config_path.display(), e),
                }
            }
        }

        Self::from_env()
    }

    /// Reject settings no run can honor
    pub fn validate(&self) -> crate::Result<()> {
        if self.top_chains == 0 {
            return Err(crate::PipelineError::Configuration {
                message: "top_chains must be at least 1".to_string(),
                suggestion: Some(format!("The usual value is {}", DEFAULT_TOP_CHAINS)),
            });
        }
        if self.top_quantities == 0 {
            return Err(crate::PipelineError::Configuration {
                message: "top_quantities must be at least 1".to_string(),
                suggestion: Some(format!("The usual value is {}", DEFAULT_TOP_QUANTITIES)),
            });
        }
        Ok(())
    }
}

/// Builder for customizing configuration
#[derive(Default)]
pub struct ConfigBuilder {
    config: PipelineConfig,
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn price_basis(mut self, basis: PriceBasis) -> Self {
        self.config.price_basis = basis;
        self
    }

    pub fn unknown_pharmacy_policy(mut self, policy: UnknownPharmacyPolicy) -> Self {
        self.config.unknown_pharmacy_policy = policy;
        self
    }

    /// Set skip invalid records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.config.skip_invalid_records = skip;
        self
    }

    /// Set progress bar enabled
    pub fn progress_bar(mut self, enabled: bool) -> Self {
        self.config.enable_progress_bar = enabled;
        self
    }

    pub fn output_format(mut self, format: ExportFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn pretty_print(mut self, pretty: bool) -> Self {
        self.config.pretty_print = pretty;
        self
    }

    pub fn top_chains(mut self, n: usize) -> Self {
        self.config.top_chains = n;
        self
    }

    pub fn top_quantities(mut self, n: usize) -> Self {
        self.config.top_quantities = n;
        self
    }

    /// Build the configuration
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
