//! Serialized project graph.
//!
//! Produced by the project evaluation step outside this tool:
//!
//! ```json
//! {
//!   "entry": "Server/Server.csproj",
//!   "projects": [
//!     {
//!       "path": "Server/Server.csproj",
//!       "targetFramework": "net8.0",
//!       "capabilities": ["AspNetCore"],
//!       "references": ["Client/Client.csproj"]
//!     },
//!     {
//!       "path": "Client/Client.csproj",
//!       "targetFramework": "net8.0",
//!       "capabilities": ["WebAssembly"],
//!       "hotReloadCapabilities": ["Baseline"]
//!     }
//!   ]
//! }
//! ```
//!
//! Relative paths resolve against the graph file's directory.

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::Deserialize;
use thiserror::Error;

use crate::utils::path::resolve_path;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to read project graph `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("invalid project graph: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("entry project `{0}` is not part of the graph")]
    MissingEntry(PathBuf),

    #[error("project `{from}` references `{to}`, which is not part of the graph")]
    UnknownReference { from: PathBuf, to: PathBuf },

    #[error("project `{0}` appears more than once")]
    Duplicate(PathBuf),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphFile {
    entry: PathBuf,
    projects: Vec<ProjectNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectNode {
    pub path: PathBuf,
    #[serde(default)]
    pub target_framework: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Project-declared hot reload capabilities, override negotiation
    #[serde(default)]
    pub hot_reload_capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub references: Vec<PathBuf>,
}

impl ProjectNode {
    /// File stem, used as the display name.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(|| self.path.display().to_string(), |s| s.to_string_lossy().into_owned())
    }

    /// Directory holding the project file.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn is_web_app(&self) -> bool {
        self.has_capability("AspNetCore")
    }

    pub fn is_webassembly(&self) -> bool {
        self.has_capability("WebAssembly")
    }

    pub fn target_framework(&self) -> &str {
        &self.target_framework
    }

    /// Major version of a `netX.Y` / `netcoreappX.Y` moniker.
    ///
    /// `net8.0-browser` → 8, `netstandard2.0` → `None`.
    pub fn target_framework_version(&self) -> Option<u32> {
        let tfm = self.target_framework.to_ascii_lowercase();
        let rest = tfm
            .strip_prefix("netcoreapp")
            .or_else(|| tfm.strip_prefix("net"))?;
        let major: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if major.is_empty() || !rest[major.len()..].starts_with('.') {
            return None;
        }
        major.parse().ok()
    }

    pub fn references(&self) -> &[PathBuf] {
        &self.references
    }
}

/// Project nodes keyed by normalized path.
#[derive(Debug, Clone)]
pub struct ProjectGraph {
    entry: PathBuf,
    nodes: FxHashMap<PathBuf, ProjectNode>,
}

impl ProjectGraph {
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let content =
            fs::read_to_string(path).map_err(|err| GraphError::Io(path.to_path_buf(), err))?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        Self::from_json(&content, base_dir)
    }

    pub fn from_json(json: &str, base_dir: &Path) -> Result<Self, GraphError> {
        let file: GraphFile = serde_json::from_str(json)?;

        let mut nodes = FxHashMap::default();
        for mut node in file.projects {
            node.path = resolve_path(&node.path, base_dir);
            node.references = node
                .references
                .iter()
                .map(|r| resolve_path(r, base_dir))
                .collect();
            if let Some(previous) = nodes.insert(node.path.clone(), node) {
                return Err(GraphError::Duplicate(previous.path));
            }
        }

        for node in nodes.values() {
            if let Some(missing) = node.references.iter().find(|r| !nodes.contains_key(*r)) {
                return Err(GraphError::UnknownReference {
                    from: node.path.clone(),
                    to: missing.clone(),
                });
            }
        }

        let entry = resolve_path(&file.entry, base_dir);
        if !nodes.contains_key(&entry) {
            return Err(GraphError::MissingEntry(entry));
        }

        Ok(Self { entry, nodes })
    }

    pub fn entry(&self) -> &ProjectNode {
        // Checked in `from_json`
        &self.nodes[&self.entry]
    }

    pub fn get(&self, path: &Path) -> Option<&ProjectNode> {
        self.nodes.get(path)
    }

    /// Referenced projects of `node`, in declaration order.
    pub fn referenced<'a>(&'a self, node: &'a ProjectNode) -> impl Iterator<Item = &'a ProjectNode> {
        node.references.iter().filter_map(|r| self.nodes.get(r))
    }

    /// All projects, sorted by path.
    pub fn projects(&self) -> Vec<&ProjectNode> {
        let mut projects: Vec<_> = self.nodes.values().collect();
        projects.sort_by(|a, b| a.path.cmp(&b.path));
        projects
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
