//! Layered build configuration
//!
//! Settings are loaded from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use assetmatrix::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Writing to: {}", config.build.output_dir.display());
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `ASSETMATRIX__<section>__<key>`:
//! - `ASSETMATRIX__LIMITS__FD_LIMIT=32`
//! - `ASSETMATRIX__LIMITS__PIPE_BUFFER=256KB`
//! - `ASSETMATRIX__BUILD__OUTPUT_DIR=dist`
//!
//! # Configuration File
//!
//! `assetmatrix.toml` in the working directory, or the path in
//! `ASSETMATRIX_CONFIG`.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{BuildConfig, Config, DirectivesConfig, HandlerRuleConfig, LimitsConfig};
pub use sources::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load and validate configuration from the default file and the
    /// environment
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a specific file
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Re-run validation, e.g. after command-line overrides
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}
