//! App model topology.
//!
//! Decides which hot reload clients a session needs by walking the project
//! graph breadth-first from the entry project:
//!
//! | Variant                   | Clients            | Agent injected into |
//! |---------------------------|--------------------|---------------------|
//! | `Default`                 | agent              | entry project       |
//! | `WebApplication`          | agent (+ refresh)  | entry project       |
//! | `BlazorWebAssembly`       | browser            | none                |
//! | `BlazorWebAssemblyHosted` | browser + agent    | server project      |

mod graph;

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::client::{AgentClient, BrowserClient, BrowserRefreshServer, HotReloadClient};

pub use graph::{ProjectGraph, ProjectNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppModel {
    /// Plain process, one in-process agent.
    Default { project: PathBuf },
    /// Server app; browser auto-refresh is optional.
    WebApplication { project: PathBuf },
    /// Standalone WebAssembly app served by a static dev server.
    BlazorWebAssembly { client: PathBuf },
    /// WebAssembly client hosted by a server app.
    BlazorWebAssemblyHosted { client: PathBuf, server: PathBuf },
}

impl AppModel {
    /// Infer the topology from the entry project of `graph`.
    pub fn infer(graph: &ProjectGraph) -> Self {
        let entry = graph.entry();
        let mut host: Option<&ProjectNode> = None;

        let mut visited = FxHashSet::default();
        visited.insert(entry.path.as_path());
        let mut queue = VecDeque::from([entry]);

        while let Some(node) = queue.pop_front() {
            if node.is_web_app() {
                host.get_or_insert(node);
            } else if node.is_webassembly() {
                let client = node.path.clone();
                return match host {
                    Some(server) => Self::BlazorWebAssemblyHosted {
                        client,
                        server: server.path.clone(),
                    },
                    None => Self::BlazorWebAssembly { client },
                };
            }

            for referenced in graph.referenced(node) {
                if visited.insert(referenced.path.as_path()) {
                    queue.push_back(referenced);
                }
            }
        }

        let project = entry.path.clone();
        match host {
            Some(_) => Self::WebApplication { project },
            None => Self::Default { project },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Default { .. } => "Default",
            Self::WebApplication { .. } => "WebApplication",
            Self::BlazorWebAssembly { .. } => "BlazorWebAssembly",
            Self::BlazorWebAssemblyHosted { .. } => "BlazorWebAssemblyHosted",
        }
    }

    /// Whether deltas can only reach the app through the browser.
    pub fn requires_browser_refresh(&self) -> bool {
        matches!(
            self,
            Self::BlazorWebAssembly { .. } | Self::BlazorWebAssemblyHosted { .. }
        )
    }

    /// Whether a refresh server is useful at all (auto-refresh for web apps).
    pub fn uses_browser_refresh(&self) -> bool {
        !matches!(self, Self::Default { .. })
    }

    /// Project the agent must be injected into, if any.
    pub fn agent_injection_target(&self) -> Option<&Path> {
        match self {
            Self::Default { project } | Self::WebApplication { project } => Some(project),
            Self::BlazorWebAssembly { .. } => None,
            Self::BlazorWebAssemblyHosted { server, .. } => Some(server),
        }
    }

    /// Build the ordered client list for this topology.
    ///
    /// Browser variants without a refresh server yield no clients: the
    /// session keeps watching but cannot apply deltas.
    pub fn create_clients(
        &self,
        graph: &ProjectGraph,
        browser: Option<Arc<BrowserRefreshServer>>,
        pipe_name: &str,
    ) -> Vec<HotReloadClient> {
        let agent = |path: &Path| {
            let node = graph.get(path);
            HotReloadClient::Agent(AgentClient::new(
                node.map_or_else(|| path.display().to_string(), ProjectNode::name),
                pipe_name,
                node.and_then(|n| n.hot_reload_capabilities.clone()),
            ))
        };
        let browser_client = |path: &Path, server: Arc<BrowserRefreshServer>| {
            let node = graph.get(path);
            HotReloadClient::Browser(BrowserClient::new(
                node.map_or_else(|| path.display().to_string(), ProjectNode::name),
                server,
                node.and_then(|n| n.hot_reload_capabilities.clone()),
                node.and_then(ProjectNode::target_framework_version),
            ))
        };

        match (self, browser) {
            (Self::Default { project } | Self::WebApplication { project }, _) => {
                vec![agent(project)]
            }
            (Self::BlazorWebAssembly { client }, Some(server)) => {
                vec![browser_client(client, server)]
            }
            (Self::BlazorWebAssemblyHosted { client, server }, Some(refresh)) => {
                vec![browser_client(client, refresh), agent(server)]
            }
            (model, None) => {
                crate::log!(
                    "warning";
                    "{} needs the browser refresh server, which is not running; changes will not be applied",
                    model.name()
                );
                Vec::new()
            }
        }
    }
}

impl fmt::Display for AppModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
