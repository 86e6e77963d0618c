//! `deltawatch topology`: print the inferred app model without running it.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use crate::app_model::{AppModel, ProjectGraph, ProjectNode};
use crate::client::capabilities;

/// One client the session would create.
#[derive(Debug, PartialEq, Eq)]
pub struct ClientPlan {
    pub kind: &'static str,
    pub project: String,
    /// Known up front; `None` means the agent reports them on connect.
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct Topology {
    pub model: AppModel,
    pub projects: usize,
    pub clients: Vec<ClientPlan>,
}

impl Topology {
    pub fn of(graph: &ProjectGraph) -> Self {
        let model = AppModel::infer(graph);
        let clients = plan_clients(&model, graph);
        Self {
            model,
            projects: graph.len(),
            clients,
        }
    }
}

/// Same order as [`AppModel::create_clients`].
fn plan_clients(model: &AppModel, graph: &ProjectGraph) -> Vec<ClientPlan> {
    let agent = |path: &Path| {
        let node = graph.get(path);
        ClientPlan {
            kind: "agent",
            project: project_name(node, path),
            capabilities: node.and_then(|n| n.hot_reload_capabilities.clone()),
        }
    };
    let browser = |path: &Path| {
        let node = graph.get(path);
        let capabilities = node
            .and_then(|n| n.hot_reload_capabilities.clone())
            .unwrap_or_else(|| {
                capabilities::browser_fallback(node.and_then(ProjectNode::target_framework_version))
            });
        ClientPlan {
            kind: "browser",
            project: project_name(node, path),
            capabilities: Some(capabilities),
        }
    };

    match model {
        AppModel::Default { project } | AppModel::WebApplication { project } => vec![agent(project)],
        AppModel::BlazorWebAssembly { client } => vec![browser(client)],
        AppModel::BlazorWebAssemblyHosted { client, server } => vec![browser(client), agent(server)],
    }
}

fn project_name(node: Option<&ProjectNode>, path: &Path) -> String {
    node.map_or_else(|| path.display().to_string(), ProjectNode::name)
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}",
            self.model.name().green().bold(),
            format!("({} project{})", self.projects, if self.projects == 1 { "" } else { "s" }).dimmed()
        )?;

        match self.model.agent_injection_target() {
            Some(target) => writeln!(f, "{} {}", "agent into".dimmed(), target.display())?,
            None => writeln!(f, "{}", "no agent, deltas go through the browser".dimmed())?,
        }
        if self.model.requires_browser_refresh() {
            writeln!(f, "{}", "requires the browser refresh server".yellow())?;
        }

        for client in &self.clients {
            write!(f, "{} {} {}", "→".cyan(), client.kind.bold(), client.project)?;
            match &client.capabilities {
                Some(caps) if caps.is_empty() => writeln!(f, " {}", "[no capabilities]".red())?,
                Some(caps) => writeln!(f, " {}", format!("[{}]", caps.join(" ")).dimmed())?,
                None => writeln!(f, " {}", "[reported on connect]".dimmed())?,
            }
        }
        Ok(())
    }
}

pub fn print_topology(graph_path: &Path) -> Result<()> {
    let graph = ProjectGraph::load(graph_path)
        .with_context(|| format!("failed to load project graph {}", graph_path.display()))?;
    print!("{}", Topology::of(&graph));
    Ok(())
}
