//! Resolution of layered group variables into one document.
//!
//! A [`Resolver`] discovers the fragments for a group list, loads them
//! (decrypting `.ejson` fragments on the way) and folds them in order with
//! its [`MergeEvaluator`]. Later fragments override earlier ones.
//!
//! Without groups the root is resolved on its own: a file root is the only
//! fragment, a directory root contributes its top-level fragments.
//!
//! Everything after discovery is strict: the first read, parse, decryption
//! or merge failure aborts the resolution and no partial document is
//! returned.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info_span};

use crate::config::{EjsonSettings, Settings};
use crate::discovery::{Discovery, FragmentDiscovery, FragmentKind};
use crate::error::ValuesError;
use crate::inventory::{ClusterInventorySource, Entry};
use crate::merge::{Document, MergeEvaluator, OperatorEvaluator};
use crate::secrets::{KeyDirDecryptor, SecretDecryptor};

/// Resolves group lists into [`Values`].
///
/// Holds no per-resolution state, so one resolver can serve concurrent
/// resolutions from several threads.
pub struct Resolver {
    discovery: FragmentDiscovery,
    decryptor: Box<dyn SecretDecryptor>,
    evaluator: Box<dyn MergeEvaluator>,
    ejson: EjsonSettings,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("discovery", &self.discovery)
            .field("key_dir", &self.ejson.key_dir)
            .field("skip_decrypt", &self.ejson.skip_decrypt)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Creates a resolver with the default discovery, key directory
    /// decryptor and operator evaluator.
    pub fn new(ejson: EjsonSettings) -> Result<Self, ValuesError> {
        let decryptor = KeyDirDecryptor::from_settings(&ejson).map_err(ValuesError::KeyMaterial)?;
        Ok(Self {
            discovery: FragmentDiscovery::new(),
            decryptor: Box::new(decryptor),
            evaluator: Box::new(OperatorEvaluator),
            ejson,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ValuesError> {
        Ok(Self::new(settings.ejson.clone())?
            .with_discovery(FragmentDiscovery::new().with_order(settings.subdirectory_order)))
    }

    pub fn with_discovery(mut self, discovery: FragmentDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_decryptor(mut self, decryptor: impl SecretDecryptor + 'static) -> Self {
        self.decryptor = Box::new(decryptor);
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl MergeEvaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    pub fn discovery(&self) -> &FragmentDiscovery {
        &self.discovery
    }

    /// Resolves `groups` below `root`. With `skip_eval` only the structural
    /// merge runs and `(( ... ))` expressions are left in place. An empty
    /// group list resolves `root` itself, see
    /// [`FragmentDiscovery::discover_source`].
    pub fn resolve<S: AsRef<str>>(
        &self,
        root: &Path,
        groups: &[S],
        skip_eval: bool,
    ) -> Result<Values, ValuesError> {
        let discovery = if groups.is_empty() {
            self.discovery.discover_source(root)
        } else {
            self.discovery.discover(root, groups)
        };
        self.resolve_layers(root, discovery, skip_eval, None)
    }

    /// Resolves the groups of `entry` selected by `limits`. When a cluster
    /// inventory source is given, its `{"vars": ...}` document is merged
    /// on top of all fragments.
    pub fn resolve_entry<L: AsRef<str>>(
        &self,
        entry: &Entry,
        limits: &[L],
        root: &Path,
        skip_eval: bool,
        cluster: Option<&dyn ClusterInventorySource>,
    ) -> Result<Values, ValuesError> {
        let _span = info_span!("resolve_entry", entry = entry.name()).entered();

        let groups = entry.valid_groups(limits)?;
        let cluster_layer = cluster
            .map(|source| entry.cluster_inventory(source))
            .transpose()?;

        let discovery = self.discovery.discover(root, &groups);
        self.resolve_layers(root, discovery, skip_eval, cluster_layer)
    }

    fn resolve_layers(
        &self,
        root: &Path,
        discovery: Discovery,
        skip_eval: bool,
        cluster_layer: Option<Document>,
    ) -> Result<Values, ValuesError> {
        let last = discovery.files.len();
        let evaluate_at = if cluster_layer.is_some() { last } else { last.saturating_sub(1) };

        let mut document = Document::new();
        for (index, path) in discovery.files.iter().enumerate() {
            let fragment = self.load_fragment(path)?;
            let evaluate = !skip_eval && index == evaluate_at;
            document = self
                .evaluator
                .merge(document, fragment, evaluate)
                .map_err(|source| ValuesError::Merge {
                    path: path.clone(),
                    source,
                })?;
        }

        if let Some(layer) = cluster_layer {
            document = self
                .evaluator
                .merge(document, layer, !skip_eval)
                .map_err(ValuesError::MergeClusterInventory)?;
        }

        debug!(
            root = %root.display(),
            fragments = discovery.files.len(),
            complete = discovery.complete,
            "Resolved values"
        );

        Ok(Values {
            document,
            fragments: discovery.files,
            complete: discovery.complete,
        })
    }

    /// Reads, decrypts if needed and parses one fragment.
    fn load_fragment(&self, path: &Path) -> Result<Document, ValuesError> {
        let bytes = fs::read(path).map_err(|source| ValuesError::ReadFragment {
            path: path.to_path_buf(),
            source,
        })?;

        let encrypted = FragmentKind::from_path(path).is_some_and(FragmentKind::is_encrypted);
        let bytes = if encrypted && !self.ejson.skip_decrypt {
            self.decryptor
                .decrypt(&bytes, &self.ejson.key_dir)
                .map_err(|source| ValuesError::Decrypt {
                    path: path.to_path_buf(),
                    source,
                })?
        } else {
            bytes
        };

        debug!(path = %path.display(), encrypted, "Loading fragment");
        parse_fragment(path, &bytes)
    }
}

fn parse_fragment(path: &Path, bytes: &[u8]) -> Result<Document, ValuesError> {
    if is_blank(bytes) {
        return Ok(Document::new());
    }

    let value: Value =
        serde_yaml::from_slice(bytes).map_err(|e| ValuesError::ParseFragment {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Document::new()),
        other => Err(ValuesError::NotAMapping {
            path: path.to_path_buf(),
            found: kind_of(&other),
        }),
    }
}

/// Whitespace and comments only.
fn is_blank(bytes: &[u8]) -> bool {
    bytes
        .split(|byte| *byte == b'\n')
        .map(|line| line.trim_ascii())
        .all(|line| line.is_empty() || line.starts_with(b"#"))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// A resolved document together with the fragments it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Values {
    document: Document,
    fragments: Vec<PathBuf>,
    complete: bool,
}

impl Values {
    /// Resolves `groups` below `root` with the default resolver.
    pub fn new<S: AsRef<str>>(
        root: &Path,
        groups: &[S],
        skip_eval: bool,
        ejson: &EjsonSettings,
    ) -> Result<Self, ValuesError> {
        Resolver::new(ejson.clone())?.resolve(root, groups, skip_eval)
    }

    /// The whole document when `fields` is empty, otherwise only the
    /// requested top-level keys that exist.
    pub fn as_map<S: AsRef<str>>(&self, fields: &[S]) -> Map<String, Value> {
        if fields.is_empty() {
            return self.document.clone();
        }

        fields
            .iter()
            .filter_map(|field| {
                let field = field.as_ref();
                self.document
                    .get(field)
                    .map(|value| (field.to_string(), value.clone()))
            })
            .collect()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    /// Fragments in merge order.
    pub fn fragments(&self) -> &[PathBuf] {
        &self.fragments
    }

    /// False when discovery could not read every path, see
    /// [`crate::discovery::Discovery::complete`].
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ClusterInventoryError;
    use crate::merge::MergeError;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn resolver() -> Resolver {
        Resolver::new(EjsonSettings::default()).unwrap()
    }

    #[test]
    fn test_later_groups_override() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.yaml", "color: blue\nshape: round\n");
        write(dir.path(), "web.yaml", "color: red\n");

        let values = resolver().resolve(dir.path(), &["all", "web"], false).unwrap();
        assert_eq!(
            Value::Object(values.document().clone()),
            json!({"color": "red", "shape": "round"})
        );
        assert_eq!(values.fragments().len(), 2);
        assert!(values.is_complete());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let values = resolver()
            .resolve(Path::new("/nonexistent/group_vars"), &["all"], false)
            .unwrap();
        assert!(values.document().is_empty());
        assert!(values.fragments().is_empty());
    }

    #[test]
    fn test_empty_fragment_is_empty_mapping() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.yaml", "");
        write(dir.path(), "web.yaml", "# only a comment\n");

        let values = resolver().resolve(dir.path(), &["all", "web"], false).unwrap();
        assert!(values.document().is_empty());
    }

    #[test]
    fn test_non_mapping_fragment_is_error() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.yaml", "- a\n- b\n");

        let result = resolver().resolve(dir.path(), &["all"], false);
        assert!(matches!(
            result,
            Err(ValuesError::NotAMapping { found: "a sequence", .. })
        ));
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.yaml", "color: blue\n");
        write(dir.path(), "web.json", "{\"color\": ");

        let result = resolver().resolve(dir.path(), &["all", "web"], false);
        assert!(matches!(result, Err(ValuesError::ParseFragment { ref path, .. }) if path.ends_with("web.json")));
    }

    #[test]
    fn test_expressions_see_later_fragments() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.yaml", "url: (( concat \"https://\" host ))\n");
        write(dir.path(), "web.yaml", "host: web.example.com\n");

        let values = resolver().resolve(dir.path(), &["all", "web"], false).unwrap();
        assert_eq!(values.document()["url"], "https://web.example.com");

        let raw = resolver().resolve(dir.path(), &["all", "web"], true).unwrap();
        assert_eq!(raw.document()["url"], "(( concat \"https://\" host ))");
    }

    #[test]
    fn test_merge_error_names_fragment() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.yaml", "value: (( grab missing.key ))\n");

        let result = resolver().resolve(dir.path(), &["all"], false);
        assert!(matches!(
            result,
            Err(ValuesError::Merge {
                source: MergeError::UnresolvedReference { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_skip_decrypt_loads_raw_document() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "all.ejson",
            r#"{"_public_key": "abc", "password": "EJ[1:opaque]"}"#,
        );

        let ejson = EjsonSettings {
            skip_decrypt: true,
            ..EjsonSettings::default()
        };
        let values = Values::new(dir.path(), &["all"], false, &ejson).unwrap();
        assert_eq!(values.document()["password"], "EJ[1:opaque]");
    }

    #[test]
    fn test_decrypt_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.ejson", r#"{"_public_key": "abc", "password": "EJ[1:opaque]"}"#);

        let ejson = EjsonSettings {
            key_dir: dir.path().join("keys"),
            ..EjsonSettings::default()
        };
        let result = Values::new(dir.path(), &["all"], false, &ejson);
        assert!(matches!(result, Err(ValuesError::Decrypt { .. })));
    }

    #[test]
    fn test_as_map_filters_fields() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.yaml", "x: 1\nz: 3\n");

        let values = resolver().resolve(dir.path(), &["all"], false).unwrap();

        let selected = values.as_map(&["x", "y"]);
        assert_eq!(Value::Object(selected), json!({"x": 1}));

        let everything = values.as_map::<&str>(&[]);
        assert_eq!(Value::Object(everything), json!({"x": 1, "z": 3}));
    }

    #[test]
    fn test_resolve_entry_with_cluster_layer() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.yaml", "color: blue\nregion: (( grab vars.region ))\n");
        write(dir.path(), "web.yaml", "color: red\n");
        write(dir.path(), "web01.yaml", "size: L\n");

        let source = |_: &str, _: &str| -> Result<BTreeMap<String, String>, ClusterInventoryError> {
            Ok(BTreeMap::from([(
                "inventory".to_string(),
                "region: eu-west\n".to_string(),
            )]))
        };
        let source: &dyn ClusterInventorySource = &source;

        let entry = Entry::new("web01", &["web"]);
        let values = resolver()
            .resolve_entry(&entry, &["all", "web"], dir.path(), false, Some(source))
            .unwrap();

        assert_eq!(
            Value::Object(values.into_document()),
            json!({"color": "red", "region": "eu-west", "vars": {"region": "eu-west"}})
        );
    }

    #[test]
    fn test_resolve_entry_invalid_limit() {
        let dir = TempDir::new().unwrap();
        let entry = Entry::new("web01", &["web"]);
        let result = resolver().resolve_entry(&entry, &["[bad"], dir.path(), false, None);
        assert!(matches!(result, Err(ValuesError::Limit(_))));
    }

    #[test]
    fn test_concurrent_resolutions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "all.yaml", "color: blue\n");
        write(dir.path(), "web.yaml", "color: red\n");
        write(dir.path(), "db.yaml", "color: green\n");

        let resolver = resolver();
        let cases = [("web", "red"), ("db", "green"), ("all", "blue")];

        std::thread::scope(|scope| {
            for (group, expected) in cases {
                let resolver = &resolver;
                let root = dir.path();
                scope.spawn(move || {
                    let values = resolver.resolve(root, &["all", group], false).unwrap();
                    assert_eq!(values.document()["color"], expected);
                });
            }
        });
    }
}
