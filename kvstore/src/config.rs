//! Store configuration module.
//!
//! This module provides configuration loading for the key-value store from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `KVSTORE_DATABASE_PATH`: Path of the database file (default: `./data/kvstore.db`)
//! - `KVSTORE_CREATE_IF_MISSING`: Create the file when it does not exist (default: `true`)
//!
//! # Invariants
//!
//! - `database_path` is always a non-empty path (the file may not exist yet)

use std::path::PathBuf;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path of the database file.
    pub database_path: PathBuf,
    /// Whether opening a missing file creates it (and its parent directory).
    pub create_if_missing: bool,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(Self::DEFAULT_DATABASE_PATH),
            create_if_missing: true,
        }
    }
}

impl StoreConfig {
    /// Default database file.
    pub const DEFAULT_DATABASE_PATH: &'static str = "./data/kvstore.db";

    const DATABASE_PATH_VAR: &'static str = "KVSTORE_DATABASE_PATH";
    const CREATE_IF_MISSING_VAR: &'static str = "KVSTORE_CREATE_IF_MISSING";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `KVSTORE_DATABASE_PATH` is set but empty
    /// - `KVSTORE_CREATE_IF_MISSING` is set but not a boolean
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_path = Self::load_database_path(&lookup)?;
        let create_if_missing = Self::load_create_if_missing(&lookup)?;

        Ok(Self {
            database_path,
            create_if_missing,
        })
    }

    fn load_database_path(lookup: &impl Fn(&str) -> Option<String>) -> Result<PathBuf, ConfigError> {
        match lookup(Self::DATABASE_PATH_VAR) {
            Some(value) if value.is_empty() => Err(ConfigError::InvalidValue {
                name: Self::DATABASE_PATH_VAR.to_string(),
                message: "must not be empty".to_string(),
            }),
            Some(value) => Ok(PathBuf::from(value)),
            None => Ok(PathBuf::from(Self::DEFAULT_DATABASE_PATH)),
        }
    }

    fn load_create_if_missing(lookup: &impl Fn(&str) -> Option<String>) -> Result<bool, ConfigError> {
        let Some(value) = lookup(Self::CREATE_IF_MISSING_VAR) else {
            return Ok(true);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name: Self::CREATE_IF_MISSING_VAR.to_string(),
                message: format!("'{value}' is not a boolean (use true/false/1/0)"),
            }),
        }
    }
}
