//! Builder patterns for creating inventory files programmatically.

#![allow(dead_code)]

use std::collections::BTreeMap;

use groupvars::inventory::{
    ClusterInventoryConfig, EntryConfig, InventoryConfig, KubeconfigConfig,
};

/// Builder for `inventory:` documents.
#[derive(Default)]
pub struct InventoryBuilder {
    entries: Vec<EntryConfig>,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry with default kubeconfig and cluster inventory settings.
    pub fn entry(mut self, name: &str, groups: &[&str]) -> Self {
        self.entries.push(EntryBuilder::new(name).groups(groups).build());
        self
    }

    /// Add an entry built separately.
    pub fn with_entry(mut self, entry: EntryConfig) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn build(self) -> InventoryConfig {
        InventoryConfig {
            inventory: self.entries,
        }
    }

    /// Render as the YAML accepted by `Inventory::parse`.
    pub fn to_yaml(self) -> String {
        serde_yaml::to_string(&self.build()).expect("Failed to serialize inventory")
    }
}

/// Builder for a single inventory entry.
pub struct EntryBuilder {
    config: EntryConfig,
}

impl EntryBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: EntryConfig {
                name: name.to_string(),
                ..EntryConfig::default()
            },
        }
    }

    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.config.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn kubeconfig_file(mut self, path: &str) -> Self {
        self.config.kubeconfig = Some(KubeconfigConfig {
            backend: "file".to_string(),
            params: BTreeMap::from([("path".to_string(), path.to_string())]),
        });
        self
    }

    pub fn cluster_inventory(mut self, namespace: &str, config_map: &str) -> Self {
        self.config.cluster_inventory = ClusterInventoryConfig {
            namespace: namespace.to_string(),
            config_map: config_map.to_string(),
        };
        self
    }

    pub fn build(self) -> EntryConfig {
        self.config
    }
}
