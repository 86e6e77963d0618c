//! `[session]` section configuration.
//!
//! ```toml
//! [session]
//! updates_dir = "obj/deltas"                       # Where the build drops *.delta.json
//! watch_extensions = ["cs", "razor", "cshtml", "css"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigDiagnostics;

/// Updates directory used when none is configured, under the entry project.
pub const DEFAULT_UPDATES_DIR: &str = ".deltawatch/updates";

/// Session wiring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Resolved against the config file's directory.
    pub updates_dir: Option<PathBuf>,

    /// Source file extensions watched in every project directory (no dot).
    pub watch_extensions: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            updates_dir: None,
            watch_extensions: ["cs", "razor", "cshtml", "css"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl SessionConfig {
    pub fn updates_dir_for(&self, entry_dir: &Path) -> PathBuf {
        self.updates_dir
            .clone()
            .unwrap_or_else(|| entry_dir.join(DEFAULT_UPDATES_DIR))
    }

    /// Whether `path` has one of the watched extensions.
    pub fn is_watched_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.watch_extensions
                    .iter()
                    .any(|watched| watched.eq_ignore_ascii_case(ext))
            })
    }

    pub fn validate(&self, diag: &mut ConfigDiagnostics) {
        for ext in &self.watch_extensions {
            if ext.is_empty() {
                diag.error("session.watch_extensions", "contains an empty extension");
            } else if let Some(stripped) = ext.strip_prefix('.') {
                diag.error_with_hint(
                    "session.watch_extensions",
                    format!("`{ext}` starts with a dot"),
                    format!("write it as \"{stripped}\""),
                );
            }
        }
    }
}
