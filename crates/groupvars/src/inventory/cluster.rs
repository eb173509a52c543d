//! Cluster-provided inventory variables.
//!
//! A cluster publishes extra variables in a ConfigMap whose `inventory` key
//! holds a YAML (or JSON) mapping. Fetching the ConfigMap itself is left to
//! a [`ClusterInventorySource`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::merge::Document;

/// ConfigMap data key holding the inventory document.
pub const INVENTORY_DATA_KEY: &str = "inventory";

pub const DEFAULT_NAMESPACE: &str = "kube-system";
pub const DEFAULT_CONFIG_MAP: &str = "cluster-inventory";

#[derive(Error, Debug)]
pub enum ClusterInventoryError {
    #[error("ConfigMap {namespace}/{name}: {message}")]
    Fetch {
        namespace: String,
        name: String,
        message: String,
    },

    #[error("Wrong cluster-inventory format in {namespace}/{name}: expecting '{}' key in ConfigMap data", INVENTORY_DATA_KEY)]
    MissingInventoryKey { namespace: String, name: String },

    #[error("Cannot parse cluster-inventory {namespace}/{name} as YAML/JSON: {message}")]
    Parse {
        namespace: String,
        name: String,
        message: String,
    },
}

/// Where an entry's cluster inventory lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInventoryConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_config_map", rename = "configmap", alias = "config_map")]
    pub config_map: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_config_map() -> String {
    DEFAULT_CONFIG_MAP.to_string()
}

impl Default for ClusterInventoryConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            config_map: default_config_map(),
        }
    }
}

impl ClusterInventoryConfig {
    /// Replaces empty fields with the defaults.
    pub fn with_defaults(self) -> Self {
        Self {
            namespace: if self.namespace.is_empty() {
                default_namespace()
            } else {
                self.namespace
            },
            config_map: if self.config_map.is_empty() {
                default_config_map()
            } else {
                self.config_map
            },
        }
    }
}

/// Provides the data section of a ConfigMap, typically backed by a cluster API client.
pub trait ClusterInventorySource: Send + Sync {
    fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterInventoryError>;
}

impl<F> ClusterInventorySource for F
where
    F: Fn(&str, &str) -> Result<BTreeMap<String, String>, ClusterInventoryError> + Send + Sync,
{
    fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterInventoryError> {
        self(namespace, name)
    }
}

/// Fetches the cluster inventory and wraps it as `{"vars": data}`.
pub fn fetch_cluster_inventory(
    source: &dyn ClusterInventorySource,
    config: &ClusterInventoryConfig,
) -> Result<Document, ClusterInventoryError> {
    let namespace = config.namespace.as_str();
    let name = config.config_map.as_str();

    let data = source.config_map_data(namespace, name)?;
    let raw = data
        .get(INVENTORY_DATA_KEY)
        .ok_or_else(|| ClusterInventoryError::MissingInventoryKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;

    let parse_error = |message: String| ClusterInventoryError::Parse {
        namespace: namespace.to_string(),
        name: name.to_string(),
        message,
    };

    let vars = match serde_yaml::from_str::<Value>(raw).map_err(|e| parse_error(e.to_string()))? {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err(parse_error("top level must be a mapping".to_string())),
    };

    debug!(namespace, config_map = name, keys = vars.len(), "Fetched cluster inventory");

    let mut document = Document::new();
    document.insert("vars".to_string(), Value::Object(vars));
    Ok(document)
}
