//! Observability sink for fragment discovery.
//!
//! Discovery reports what it skipped and what it found through a
//! [`DiscoveryObserver`] instead of logging directly, so callers decide
//! whether events go to `tracing`, into a test buffer, or nowhere.

use std::path::PathBuf;

use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// A path below a group directory could not be read and was skipped.
    PathSkipped { path: PathBuf, error: String },

    /// A glob pattern could not be built or one of its matches was unreadable.
    GlobFailed { pattern: String, error: String },

    /// The group has no directory under the root. Not an error:
    /// [`TracingObserver`] logs it at `debug`, while other inaccessible
    /// paths ([`DiscoveryEvent::PathSkipped`]) are logged at `warn`.
    GroupDirectoryMissing { group: String, path: PathBuf },

    /// Final ordered fragment list for one discovery call.
    Ordered { files: Vec<PathBuf> },
}

pub trait DiscoveryObserver: Send + Sync {
    fn on_event(&self, event: &DiscoveryEvent);
}

impl<F> DiscoveryObserver for F
where
    F: Fn(&DiscoveryEvent) + Send + Sync,
{
    fn on_event(&self, event: &DiscoveryEvent) {
        self(event)
    }
}

/// Forwards discovery events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DiscoveryObserver for TracingObserver {
    fn on_event(&self, event: &DiscoveryEvent) {
        match event {
            DiscoveryEvent::PathSkipped { path, error } => {
                warn!(path = %path.display(), error = %error, "Failed to access path in group vars, skipping");
            }
            DiscoveryEvent::GlobFailed { pattern, error } => {
                warn!(pattern = %pattern, error = %error, "Failed to match files in group vars directory");
            }
            DiscoveryEvent::GroupDirectoryMissing { group, path } => {
                debug!(group = %group, path = %path.display(), "No group directory");
            }
            DiscoveryEvent::Ordered { files } => {
                let joined = files
                    .iter()
                    .map(|f| f.display().to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                debug!(count = files.len(), files = %joined, "Ordered list of files to merge");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DiscoveryObserver for NoopObserver {
    fn on_event(&self, _event: &DiscoveryEvent) {}
}
