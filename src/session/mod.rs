//! Hot reload session.
//!
//! Wires the file watcher, the change debouncer and the clients chosen by
//! the app model:
//!
//! ```text
//! FileWatcher ──crossbeam──► bridge thread ──mpsc──► Debouncer
//!                                                       │ batch
//!                  ┌────────────────────────────────────┤
//!                  ▼                                    ▼
//!        *.delta.json → UpdateBatch              source changes
//!                  │                              (logged for the build)
//!                  ▼
//!            ClientSet::apply ──► WatchStatus
//! ```
//!
//! The watcher starts before the clients connect, so changes made while
//! waiting for the app are buffered, not lost.

mod clients;
mod intake;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::Receiver;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::app_model::{AppModel, ProjectGraph};
use crate::client::BrowserRefreshServer;
use crate::config::DeltaConfig;
use crate::core::ChangedPath;
use crate::utils::path::normalize_path;
use crate::watch::{Debouncer, FileWatcher, WatchMode};
use crate::{debug, log, logger};

use clients::ClientSet;
use intake::Retries;

/// Bridge channel buffer size
const CHANNEL_BUFFER: usize = 64;

/// Placeholder file name standing for "every file in the updates directory".
const UPDATES_PLACEHOLDER: &str = "batch.delta.json";

/// Delay between attempts to read an update file that did not parse.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Attempts before an unparsable update file is reported and left alone.
const RETRY_LIMIT: u32 = 10;

pub struct Session {
    config: Arc<DeltaConfig>,
    graph: ProjectGraph,
    model: AppModel,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(config: Arc<DeltaConfig>, graph: ProjectGraph) -> Self {
        let model = AppModel::infer(&graph);
        Self {
            config,
            graph,
            model,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the session when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn model(&self) -> &AppModel {
        &self.model
    }

    /// Run until cancelled.
    pub async fn run(self) -> Result<()> {
        let config = Arc::clone(&self.config);
        log!("watch"; "app model: {}", self.model);

        let updates_dir = self.prepare_updates_dir()?;

        // Watcher first: events buffer in the channel while clients connect
        let (sink, raw_rx) = crossbeam::channel::unbounded();
        let watcher = FileWatcher::new(config.watch.options(), sink);
        self.install_watches(&watcher, &updates_dir)?;
        let changes_rx = spawn_bridge(raw_rx);

        let browser = self.start_browser_server().await;
        let clients = ClientSet::new(
            self.model
                .create_clients(&self.graph, browser.clone(), &config.agent.pipe_name()),
            browser,
        );
        clients.initiate()?;
        self.announce(&clients);

        let result = self
            .drive(&clients, &watcher, changes_rx, &updates_dir)
            .await;

        clients.dispose();
        watcher.dispose();
        debug!("watch"; "session stopped");
        result
    }

    async fn drive(
        &self,
        clients: &ClientSet,
        watcher: &FileWatcher,
        mut changes_rx: mpsc::Receiver<ChangedPath>,
        updates_dir: &Path,
    ) -> Result<()> {
        let cancel = &self.cancel;
        let config = &self.config;

        if clients
            .connect(config.agent.connect_timeout(), cancel)
            .await
            .is_err()
        {
            return Ok(());
        }
        match clients.aggregate_capabilities(cancel).await {
            Ok(capabilities) if !capabilities.is_empty() => {
                log!("watch"; "capabilities: {}", capabilities.join(" "));
            }
            Ok(_) => {}
            Err(_) => return Ok(()),
        }

        // Replay batches produced before the session started
        let mut retries = Retries::new(RETRY_LIMIT);
        let pending = intake::pending_files(updates_dir)?;
        if !pending.is_empty() {
            log!("watch"; "applying {} pending update batch(es)", pending.len());
        }
        for path in pending {
            self.apply_file(clients, &path, &mut retries).await;
        }
        clients.initial_updates_applied();

        let mut debouncer = Debouncer::new(config.watch.debounce());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(change) = changes_rx.recv() => debouncer.add(change),
                _ = tokio::time::sleep(debouncer.sleep_duration()) => {
                    // Ensure watches on recreated directories stay attached
                    watcher.maintain();
                    if let Some(batch) = debouncer.take_if_ready() {
                        self.process_changes(clients, &batch, updates_dir, &mut retries).await;
                    }
                }
                // Files still being written when their event arrived
                _ = tokio::time::sleep(RETRY_DELAY), if !retries.is_empty() => {
                    for path in retries.due() {
                        self.apply_file(clients, &path, &mut retries).await;
                    }
                }
            }
        }

        for (kind, ids) in clients.pending_update_ids().await {
            if !ids.is_empty() {
                debug!(kind; "{} update(s) never confirmed: {:?}", ids.len(), ids);
            }
        }
        Ok(())
    }

    async fn process_changes(
        &self,
        clients: &ClientSet,
        batch: &[ChangedPath],
        updates_dir: &Path,
        retries: &mut Retries,
    ) {
        logger::status_detach();

        for change in batch {
            if change.path == self.config.config_path {
                log!("config"; "{} changed, restart the session to apply it", change.path.display());
            } else if self.config.session.is_watched_source(&change.path) {
                log!("watch"; "{}", change);
            }
        }

        for path in intake::arrived(batch, updates_dir) {
            if path.is_file() {
                self.apply_file(clients, &path, retries).await;
            }
        }
    }

    async fn apply_file(&self, clients: &ClientSet, path: &Path, retries: &mut Retries) {
        let batch = match intake::consume(path) {
            Ok(batch) => {
                retries.succeeded(path);
                batch
            }
            Err(e) if path.is_file() && retries.failed(path) => {
                debug!("watch"; "{} not readable yet, retrying: {:#}", path.display(), e);
                return;
            }
            Err(e) => {
                logger::status_error("failed to load update batch", &format!("{e:#}"));
                return;
            }
        };
        if batch.is_empty() {
            debug!("watch"; "empty update batch: {}", path.display());
            return;
        }

        debug!(
            "watch";
            "applying {} ({} delta(s), {} asset(s){})",
            path.display(),
            batch.managed.len(),
            batch.assets.len(),
            if batch.process_suspended { ", suspended" } else { "" }
        );
        if clients.is_empty() {
            logger::status_warning("no client to apply changes to");
            return;
        }
        let reports = clients.apply(&batch, &self.cancel).await;
        clients::report(&reports);

        if matches!(self.model, AppModel::WebApplication { .. }) && clients::applied_any(&reports) {
            clients.refresh_browser();
        }
    }

    fn prepare_updates_dir(&self) -> Result<PathBuf> {
        let dir = self
            .config
            .session
            .updates_dir_for(self.graph.entry().directory());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create updates directory {}", dir.display()))?;
        Ok(normalize_path(&dir))
    }

    fn install_watches(&self, watcher: &FileWatcher, updates_dir: &Path) -> Result<()> {
        let projects: Vec<_> = self
            .graph
            .projects()
            .into_iter()
            .map(|p| p.path.clone())
            .collect();
        watcher.watch_containing_directories(&projects, true)?;
        watcher.watch_containing_directories(&[updates_dir.join(UPDATES_PLACEHOLDER)], false)?;

        if !self.config.config_path.as_os_str().is_empty() {
            watcher.watch_files(&[&self.config.config_path])?;
        }

        let snapshot = watcher.snapshot();
        let polling = watcher
            .modes()
            .iter()
            .filter(|(_, mode)| *mode == WatchMode::Polling)
            .count();
        debug!(
            "watch";
            "{} subtree(s), {} directory watch(es), {} polling",
            snapshot.subtree.len(),
            snapshot.exact.len(),
            polling
        );
        Ok(())
    }

    async fn start_browser_server(&self) -> Option<Arc<BrowserRefreshServer>> {
        let browser = &self.config.browser;
        if !self.model.uses_browser_refresh() {
            return None;
        }
        if !browser.enable {
            debug!("browser"; "refresh server disabled by config");
            return None;
        }

        match BrowserRefreshServer::start(&browser.interface.to_string(), browser.port).await {
            Ok(server) => Some(Arc::new(server)),
            Err(e) => {
                log!("browser"; "{}", e);
                None
            }
        }
    }

    fn announce(&self, clients: &ClientSet) {
        if let Some(target) = self.model.agent_injection_target() {
            log!("agent"; "inject the agent into {}", target.display());
        }
        for client in clients.clients() {
            if let crate::client::HotReloadClient::Agent(agent) = client
                && let Some(endpoint) = agent.endpoint()
            {
                log!("agent"; "{} connects to {} ({})", client.project(), endpoint, agent.pipe_name());
            }
        }
    }
}

/// Forward watcher output into the async world.
///
/// Ends once the watcher's sink is dropped or the session stops reading.
fn spawn_bridge(raw_rx: Receiver<ChangedPath>) -> mpsc::Receiver<ChangedPath> {
    let (async_tx, async_rx) = mpsc::channel(CHANNEL_BUFFER);
    std::thread::spawn(move || {
        while let Ok(change) = raw_rx.recv() {
            if async_tx.blocking_send(change).is_err() {
                break; // Receiver dropped
            }
        }
    });
    async_rx
}
