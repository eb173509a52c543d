//! Fragment discovery for layered group variables.
//!
//! For every group, in the order given, three layers are concatenated:
//!
//! 1. fragments in the subdirectories of `<root>/<group>/`, ordered by the
//!    configured [`SubdirectoryOrder`]
//! 2. fragments directly inside `<root>/<group>/`
//! 3. `<root>/<group>.{yaml,yml,json,ejson}`
//!
//! Inside a layer, candidates are collected per extension in the fixed order
//! of [`FragmentKind::ALL`], so an `.ejson` fragment always lands after its
//! plain siblings and wins the merge.
//!
//! Discovery never fails. Unreadable paths and broken glob patterns are
//! reported to the [`DiscoveryObserver`] and the returned [`Discovery`] is
//! marked incomplete.

pub mod observer;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

pub use observer::{DiscoveryEvent, DiscoveryObserver, NoopObserver, TracingObserver};

/// Loadable fragment formats, in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Yaml,
    Yml,
    Json,
    Ejson,
}

impl FragmentKind {
    pub const ALL: [FragmentKind; 4] = [
        FragmentKind::Yaml,
        FragmentKind::Yml,
        FragmentKind::Json,
        FragmentKind::Ejson,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            FragmentKind::Yaml => "yaml",
            FragmentKind::Yml => "yml",
            FragmentKind::Json => "json",
            FragmentKind::Ejson => "ejson",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL.into_iter().find(|kind| kind.extension() == ext)
    }

    pub fn is_encrypted(self) -> bool {
        matches!(self, FragmentKind::Ejson)
    }
}

/// How fragments found in nested subdirectories of a group directory are
/// ordered relative to each other.
///
/// Subdirectories are always visited in pre-order with siblings sorted by
/// file name. `ReversePreOrder` emits the per-directory blocks back to
/// front, so a directory visited earlier overrides the ones visited after
/// it (`a/` overrides `a/x/` and `b/`). This is the established behaviour
/// and stays the default; `PreOrder` is the straightforward alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubdirectoryOrder {
    #[default]
    ReversePreOrder,
    PreOrder,
}

/// Basename filter for the non-recursive per-directory lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basename<'a> {
    Any,
    /// Matches the name literally; glob metacharacters have no effect.
    Exact(&'a str),
}

impl Basename<'_> {
    fn to_pattern(self) -> String {
        match self {
            Basename::Any => "*".to_string(),
            Basename::Exact(name) => Pattern::escape(name),
        }
    }
}

/// Ordered fragment paths, least specific first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub files: Vec<PathBuf>,
    /// False when a traversal or glob step failed and `files` may be partial.
    pub complete: bool,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Clone)]
pub struct FragmentDiscovery {
    order: SubdirectoryOrder,
    observer: Arc<dyn DiscoveryObserver>,
}

impl std::fmt::Debug for FragmentDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentDiscovery")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl Default for FragmentDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentDiscovery {
    pub fn new() -> Self {
        Self {
            order: SubdirectoryOrder::default(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_order(mut self, order: SubdirectoryOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DiscoveryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn order(&self) -> SubdirectoryOrder {
        self.order
    }

    /// Returns the ordered fragment list for `groups` below `root`.
    pub fn discover<S: AsRef<str>>(&self, root: &Path, groups: &[S]) -> Discovery {
        let mut files = Vec::new();
        let mut complete = true;

        for group in groups {
            let group = group.as_ref();
            if group.is_empty() {
                continue;
            }

            let group_dir = root.join(group);
            if self.is_group_directory(group, &group_dir, &mut complete) {
                files.extend(self.subdirectory_layer(&group_dir, &mut complete));

                let (top_level, ok) = self.data_files(&group_dir, Basename::Any);
                files.extend(top_level);
                complete &= ok;
            }

            let (named, ok) = self.data_files(root, Basename::Exact(group));
            files.extend(named);
            complete &= ok;
        }

        self.observer.on_event(&DiscoveryEvent::Ordered {
            files: files.clone(),
        });

        Discovery { files, complete }
    }

    /// Fragments for a resolution without groups: `source` itself when it
    /// is a file, otherwise the top-level fragments of the `source`
    /// directory. A missing source yields nothing.
    pub fn discover_source(&self, source: &Path) -> Discovery {
        let (files, complete) = match fs::metadata(source) {
            Ok(metadata) if metadata.is_dir() => self.data_files(source, Basename::Any),
            Ok(_) => (vec![source.to_path_buf()], true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (Vec::new(), true),
            Err(e) => {
                self.observer.on_event(&DiscoveryEvent::PathSkipped {
                    path: source.to_path_buf(),
                    error: e.to_string(),
                });
                (Vec::new(), false)
            }
        };

        self.observer.on_event(&DiscoveryEvent::Ordered {
            files: files.clone(),
        });

        Discovery { files, complete }
    }

    fn is_group_directory(&self, group: &str, group_dir: &Path, complete: &mut bool) -> bool {
        match fs::metadata(group_dir) {
            Ok(metadata) => metadata.is_dir(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.observer.on_event(&DiscoveryEvent::GroupDirectoryMissing {
                    group: group.to_string(),
                    path: group_dir.to_path_buf(),
                });
                false
            }
            Err(e) => {
                self.observer.on_event(&DiscoveryEvent::PathSkipped {
                    path: group_dir.to_path_buf(),
                    error: e.to_string(),
                });
                *complete = false;
                false
            }
        }
    }

    /// Layer 1: fragments of every directory strictly below `group_dir`.
    fn subdirectory_layer(&self, group_dir: &Path, complete: &mut bool) -> Vec<PathBuf> {
        let mut blocks: Vec<Vec<PathBuf>> = Vec::new();

        for entry in WalkDir::new(group_dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| group_dir.to_path_buf());
                    self.observer.on_event(&DiscoveryEvent::PathSkipped {
                        path,
                        error: e.to_string(),
                    });
                    *complete = false;
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            let (files, ok) = self.data_files(entry.path(), Basename::Any);
            *complete &= ok;
            blocks.push(files);
        }

        match self.order {
            SubdirectoryOrder::ReversePreOrder => blocks.into_iter().rev().flatten().collect(),
            SubdirectoryOrder::PreOrder => blocks.into_iter().flatten().collect(),
        }
    }

    /// Fragments directly inside `directory` (non-recursive) whose basename
    /// matches `basename`, one glob per extension in [`FragmentKind::ALL`]
    /// order. The flag is false if any of the globs failed.
    pub fn data_files(&self, directory: &Path, basename: Basename<'_>) -> (Vec<PathBuf>, bool) {
        let Some(dir) = directory.to_str() else {
            self.observer.on_event(&DiscoveryEvent::GlobFailed {
                pattern: directory.display().to_string(),
                error: "directory path is not valid UTF-8".to_string(),
            });
            return (Vec::new(), false);
        };

        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        let prefix = Path::new(&Pattern::escape(dir)).join(basename.to_pattern());
        let prefix = prefix.to_string_lossy();

        let mut files = Vec::new();
        let mut ok = true;

        for kind in FragmentKind::ALL {
            let pattern = format!("{}.{}", prefix, kind.extension());

            let paths = match glob::glob_with(&pattern, options) {
                Ok(paths) => paths,
                Err(e) => {
                    self.observer.on_event(&DiscoveryEvent::GlobFailed {
                        pattern,
                        error: e.to_string(),
                    });
                    ok = false;
                    continue;
                }
            };

            for path in paths {
                match path {
                    Ok(path) => files.push(path),
                    Err(e) => {
                        self.observer.on_event(&DiscoveryEvent::GlobFailed {
                            pattern: pattern.clone(),
                            error: e.to_string(),
                        });
                        ok = false;
                    }
                }
            }
        }

        (files, ok)
    }
}

/// Discovers fragments with the default order and a `tracing` observer.
pub fn discover<S: AsRef<str>>(root: &Path, groups: &[S]) -> Discovery {
    FragmentDiscovery::new().discover(root, groups)
}
