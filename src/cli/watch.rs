//! `deltawatch watch`: run a hot reload session until Ctrl+C.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::app_model::ProjectGraph;
use crate::config::DeltaConfig;
use crate::core::register_session;
use crate::session::Session;

pub fn run_watch(graph_path: &Path, config: Arc<DeltaConfig>) -> Result<()> {
    let graph = ProjectGraph::load(graph_path)
        .with_context(|| format!("failed to load project graph {}", graph_path.display()))?;
    crate::debug!("watch"; "{} project(s) in {}", graph.len(), graph_path.display());

    let cancel = CancellationToken::new();
    register_session(cancel.clone());
    let session = Session::new(config, graph).with_cancel(cancel);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(session.run())
}
