//! Test harness for isolated resolution runs.
//!
//! The `TestHarness` owns a temporary directory with:
//! - `group_vars/` holding fragments
//! - `keys/` holding private keys for encrypted fragments

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use groupvars::{encrypt_document, Document, EjsonSettings, Resolver, Values, ValuesError};

/// X25519 keypair used for every encrypted fixture.
pub const TEST_PUBLIC_KEY: &str =
    "cff306e62e170478cef56672502e95334aeae4a7e4c799b4e30ab888c8b89c00";
pub const TEST_PRIVATE_KEY: &str =
    "8c6f2a1e4b7d9c3f0a5e8b1d4c7f2a6e9b3d5c8f1a4e7b0d3c6f9a2e5b8d1c4f";

/// `{"_public_key": TEST_PUBLIC_KEY, "password": "s3cret"}` as sealed by ejson.
pub const EJSON_FIXTURE: &str = r#"{
  "_public_key": "cff306e62e170478cef56672502e95334aeae4a7e4c799b4e30ab888c8b89c00",
  "password": "EJ[1:fl6Sw3E9M9QhujCR7Ea09/XipdhvdXVl6RmBf0Kh6G8=:AAECAwQFBgcICQoLDA0ODxAREhMUFRYX:YHc1hpm98l71yRMD3Z4KjwQ+MR78Og==]"
}
"#;

/// Isolated group_vars tree plus key directory.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Root directory holding `<group>/` and `<group>.*`.
    pub root: PathBuf,
    /// Key directory for `.ejson` fragments.
    pub key_dir: PathBuf,
}

impl TestHarness {
    /// Create a new harness with empty `group_vars/` and `keys/` directories.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("group_vars");
        let key_dir = temp_dir.path().join("keys");

        std::fs::create_dir_all(&root).expect("Failed to create group_vars dir");
        std::fs::create_dir_all(&key_dir).expect("Failed to create keys dir");

        Self {
            temp_dir,
            root,
            key_dir,
        }
    }

    /// Get the base temp directory path.
    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a fragment relative to the group_vars root, creating parents.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create fragment dir");
        }
        std::fs::write(&path, content).expect("Failed to write fragment");
        path
    }

    /// Create an empty directory relative to the group_vars root.
    pub fn mkdir(&self, relative: &str) -> PathBuf {
        let path = self.root.join(relative);
        std::fs::create_dir_all(&path).expect("Failed to create dir");
        path
    }

    /// Install the test private key in the key directory.
    pub fn install_key(&self) {
        std::fs::write(
            self.key_dir.join(TEST_PUBLIC_KEY),
            format!("{}\n", TEST_PRIVATE_KEY),
        )
        .expect("Failed to write key");
    }

    /// Encrypt a JSON document with the test key and write it as a fragment.
    /// `_public_key` is added when missing.
    pub fn write_encrypted(&self, relative: &str, plain_json: &str) -> PathBuf {
        let mut document: serde_json::Value =
            serde_json::from_str(plain_json).expect("Fixture must be valid JSON");
        document
            .as_object_mut()
            .expect("Fixture must be an object")
            .entry("_public_key")
            .or_insert_with(|| serde_json::Value::String(TEST_PUBLIC_KEY.to_string()));

        let plain = serde_json::to_vec(&document).expect("Failed to serialize fixture");
        let sealed = encrypt_document(&plain).expect("Failed to encrypt fixture");

        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create fragment dir");
        }
        std::fs::write(&path, sealed).expect("Failed to write fragment");
        path
    }

    /// Settings pointing at the harness key directory.
    pub fn ejson_settings(&self) -> EjsonSettings {
        EjsonSettings {
            key_dir: self.key_dir.clone(),
            ..EjsonSettings::default()
        }
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.ejson_settings()).expect("Failed to build resolver")
    }

    /// Resolve `groups` with evaluation enabled.
    pub fn resolve(&self, groups: &[&str]) -> Result<Values, ValuesError> {
        Values::new(&self.root, groups, false, &self.ejson_settings())
    }

    /// Resolve and return the document as a JSON value.
    pub fn resolve_json(&self, groups: &[&str]) -> serde_json::Value {
        let values = self.resolve(groups).expect("Resolution failed");
        serde_json::Value::Object(values.into_document())
    }

    /// Fragment paths relative to the root, in merge order.
    pub fn relative(&self, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|path| {
                path.strip_prefix(&self.root)
                    .expect("Fragment outside root")
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a document from a JSON literal.
pub fn doc(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}
