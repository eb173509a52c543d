use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::discovery::SubdirectoryOrder;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Root directory holding `<group>/` directories and `<group>.*` files.
    #[serde(default = "default_group_vars_dir")]
    pub group_vars_dir: PathBuf,

    /// Inventory file listing the deployment targets.
    #[serde(default = "default_inventory")]
    pub inventory: PathBuf,

    /// Merge structurally without evaluating `(( ... ))` expressions.
    #[serde(default)]
    pub skip_eval: bool,

    #[serde(default)]
    pub subdirectory_order: SubdirectoryOrder,

    #[serde(default)]
    pub ejson: EjsonSettings,

    #[serde(default)]
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            group_vars_dir: default_group_vars_dir(),
            inventory: default_inventory(),
            skip_eval: false,
            subdirectory_order: SubdirectoryOrder::default(),
            ejson: EjsonSettings::default(),
            log: LogSettings::default(),
        }
    }
}

fn default_group_vars_dir() -> PathBuf {
    PathBuf::from("group_vars")
}

fn default_inventory() -> PathBuf {
    PathBuf::from("inventory.yml")
}

/// Key material for encrypted (`.ejson`) fragments.
///
/// The private key sources are consulted in order: `private_key`,
/// `private_key_file`, `private_key_env`. When none is set the key is looked
/// up in `key_dir` by the document's public key identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EjsonSettings {
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_env: Option<String>,

    /// Load `.ejson` fragments verbatim instead of decrypting them.
    #[serde(default)]
    pub skip_decrypt: bool,
}

impl Default for EjsonSettings {
    fn default() -> Self {
        Self {
            key_dir: default_key_dir(),
            private_key: None,
            private_key_file: None,
            private_key_env: None,
            skip_decrypt: false,
        }
    }
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("/opt/ejson/keys")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
