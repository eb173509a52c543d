use std::path::PathBuf;
use thiserror::Error;

use crate::inventory::{ClusterInventoryError, InventoryError, LimitError};
use crate::merge::MergeError;
use crate::secrets::SecretError;
use crate::telemetry::TelemetryError;

#[derive(Error, Debug)]
pub enum GroupVarsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Values error: {0}")]
    Values(#[from] ValuesError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Limit error: {0}")]
    Limit(#[from] LimitError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnvOverride { name: String, value: String },
}

/// Failures while composing a resolved document. Discovery problems never
/// surface here; everything from reading a discovered fragment onwards does.
#[derive(Error, Debug)]
pub enum ValuesError {
    #[error("Failed to read fragment '{path}': {source}")]
    ReadFragment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse fragment '{path}': {message}")]
    ParseFragment { path: PathBuf, message: String },

    #[error("Fragment '{path}' must contain a mapping at the top level, found {found}")]
    NotAMapping { path: PathBuf, found: &'static str },

    #[error("Failed to decrypt fragment '{path}': {source}")]
    Decrypt {
        path: PathBuf,
        #[source]
        source: SecretError,
    },

    #[error("Failed to load decryption key: {0}")]
    KeyMaterial(#[source] SecretError),

    #[error("Failed to merge fragment '{path}': {source}")]
    Merge {
        path: PathBuf,
        #[source]
        source: MergeError,
    },

    #[error("Failed to merge cluster inventory layer: {0}")]
    MergeClusterInventory(#[source] MergeError),

    #[error("Invalid limit: {0}")]
    Limit(#[from] LimitError),

    #[error("Cluster inventory unavailable: {0}")]
    ClusterInventory(#[from] ClusterInventoryError),
}

pub type Result<T> = std::result::Result<T, GroupVarsError>;
