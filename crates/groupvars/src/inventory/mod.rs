//! Inventory entries and group membership.
//!
//! The inventory file lists deployment targets:
//!
//! ```yaml
//! inventory:
//!   - name: web01
//!     groups: [web, eu]
//!     kubeconfig:
//!       backend: file
//!       params:
//!         path: ~/.kube/web01
//!     cluster_inventory:
//!       namespace: kube-system
//!       configmap: cluster-inventory
//! ```
//!
//! Each entry's membership is `["all"] ++ groups ++ [name]`.

mod cluster;
mod limits;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::merge::Document;
use crate::secrets::expand_home;

pub use cluster::{
    fetch_cluster_inventory, ClusterInventoryConfig, ClusterInventoryError,
    ClusterInventorySource, DEFAULT_CONFIG_MAP, DEFAULT_NAMESPACE, INVENTORY_DATA_KEY,
};
pub use limits::{match_limits, valid_groups, LimitError, LimitSet};

/// Group every entry belongs to first.
pub const ALL_GROUP: &str = "all";

const FILE_BACKEND: &str = "file";
const DEFAULT_KUBECONFIG: &str = "~/.kube/config";

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Failed to read inventory file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse inventory: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Inventory entry #{index}: missing required field 'name'")]
    MissingName { index: usize },

    #[error("Duplicate inventory entry name: '{0}'")]
    DuplicateName(String),

    #[error("Entry '{entry}': unsupported kubeconfig backend '{backend}'")]
    UnsupportedBackend { entry: String, backend: String },

    #[error("Entry '{entry}': kubeconfig backend '{backend}' requires parameter '{param}'")]
    MissingBackendParam {
        entry: String,
        backend: String,
        param: String,
    },
}

// ============================================
// File format
// ============================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default)]
    pub inventory: Vec<EntryConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub kubeconfig: Option<KubeconfigConfig>,

    #[serde(default)]
    pub cluster_inventory: ClusterInventoryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeconfigConfig {
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_backend() -> String {
    FILE_BACKEND.to_string()
}

/// Where to find the credentials for an entry's cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kubeconfig {
    File { path: PathBuf },
}

impl Default for Kubeconfig {
    fn default() -> Self {
        Kubeconfig::File {
            path: PathBuf::from(expand_home(DEFAULT_KUBECONFIG)),
        }
    }
}

impl Kubeconfig {
    fn from_config(entry: &str, config: &KubeconfigConfig) -> Result<Self, InventoryError> {
        match config.backend.as_str() {
            FILE_BACKEND => {
                let path = config
                    .params
                    .get("path")
                    .filter(|path| !path.is_empty())
                    .ok_or_else(|| InventoryError::MissingBackendParam {
                        entry: entry.to_string(),
                        backend: config.backend.clone(),
                        param: "path".to_string(),
                    })?;
                Ok(Kubeconfig::File {
                    path: PathBuf::from(expand_home(path)),
                })
            }
            other => Err(InventoryError::UnsupportedBackend {
                entry: entry.to_string(),
                backend: other.to_string(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Kubeconfig::File { path } => path,
        }
    }
}

// ============================================
// Entries
// ============================================

/// A deployment target with its derived group membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    name: String,
    groups: Vec<String>,
    kubeconfig: Kubeconfig,
    cluster_inventory_config: ClusterInventoryConfig,
}

impl Entry {
    /// Creates an entry with the default kubeconfig and cluster inventory location.
    pub fn new<S: AsRef<str>>(name: &str, groups: &[S]) -> Self {
        Self {
            name: name.to_string(),
            groups: membership(name, groups),
            kubeconfig: Kubeconfig::default(),
            cluster_inventory_config: ClusterInventoryConfig::default(),
        }
    }

    pub fn from_config(config: &EntryConfig) -> Result<Self, InventoryError> {
        let kubeconfig = match &config.kubeconfig {
            Some(kubeconfig) => Kubeconfig::from_config(&config.name, kubeconfig)?,
            None => Kubeconfig::default(),
        };

        Ok(Self {
            name: config.name.clone(),
            groups: membership(&config.name, &config.groups),
            kubeconfig,
            cluster_inventory_config: config.cluster_inventory.clone().with_defaults(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered membership, `all` first and the entry name last.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn kubeconfig(&self) -> &Kubeconfig {
        &self.kubeconfig
    }

    pub fn cluster_inventory_config(&self) -> &ClusterInventoryConfig {
        &self.cluster_inventory_config
    }

    pub fn match_limits<L: AsRef<str>>(&self, limits: &[L]) -> Result<bool, LimitError> {
        match_limits(&self.groups, limits)
    }

    pub fn valid_groups<L: AsRef<str>>(&self, limits: &[L]) -> Result<Vec<String>, LimitError> {
        valid_groups(&self.groups, limits)
    }

    pub fn cluster_inventory(
        &self,
        source: &dyn ClusterInventorySource,
    ) -> Result<Document, ClusterInventoryError> {
        fetch_cluster_inventory(source, &self.cluster_inventory_config)
    }
}

fn membership<S: AsRef<str>>(name: &str, groups: &[S]) -> Vec<String> {
    let mut membership = Vec::with_capacity(groups.len() + 2);
    membership.push(ALL_GROUP.to_string());
    membership.extend(groups.iter().map(|group| group.as_ref().to_string()));
    membership.push(name.to_string());
    membership
}

// ============================================
// Inventory
// ============================================

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    entries: Vec<Entry>,
}

impl Inventory {
    pub fn load(path: &Path) -> Result<Self, InventoryError> {
        let content = std::fs::read_to_string(path).map_err(|e| InventoryError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, InventoryError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: InventoryConfig = serde_yaml::from_str(content)?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &InventoryConfig) -> Result<Self, InventoryError> {
        let mut seen_names = HashSet::new();
        for (index, entry) in config.inventory.iter().enumerate() {
            if entry.name.is_empty() {
                return Err(InventoryError::MissingName { index });
            }
            if !seen_names.insert(entry.name.as_str()) {
                return Err(InventoryError::DuplicateName(entry.name.clone()));
            }
        }

        let entries = config
            .inventory
            .iter()
            .map(Entry::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entries whose membership satisfies every limit, in file order.
    pub fn entries_matching<L: AsRef<str>>(&self, limits: &[L]) -> Result<Vec<&Entry>, LimitError> {
        let limits = LimitSet::compile(limits)?;
        Ok(self
            .entries
            .iter()
            .filter(|entry| limits.matches_all(&entry.groups))
            .collect())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
