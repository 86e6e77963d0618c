//! Hot reload clients.
//!
//! A [`HotReloadClient`] is one logical runtime endpoint: the in-process
//! agent of a launched project, or the WebAssembly runtime in every
//! connected browser tab. Both follow the same lifecycle:
//!
//! ```text
//! Uninitialized ─initiate_connection─► Connecting
//!     ─first target attaches─► Connected
//!     ─get_update_capabilities (cached)─► apply_* (repeatable) ─dispose─► Disposed
//! ```
//!
//! Capability caches and pending queues live on the client instance, one
//! per session. A target may attach at any time, including after the
//! session stopped waiting for it; until one does, updates are assumed
//! applied.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{OnceCell, watch};
use tokio_util::sync::CancellationToken;

use crate::core::{ApplyStatus, ManagedCodeUpdate, StaticAssetUpdate};

mod agent;
mod applier;
mod browser;
pub mod capabilities;
mod fanout;
mod protocol;

#[cfg(test)]
mod tests;

pub use browser::BrowserRefreshServer;
pub use protocol::Severity;

use agent::{AgentServer, CapabilitySlot};
use applier::DeltaApplier;
use fanout::TargetSet;
use protocol::InitialUpdatesCompleted;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no runtime target connected")]
    TransportUnavailable,

    #[error("operation cancelled")]
    Cancelled,

    #[error("client has been disposed")]
    Disposed,

    #[error("client connection was not initiated")]
    NotInitiated,

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to start {what}: {source}")]
    Bind {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Connecting,
    Connected,
    Disposed,
}

/// Lifecycle bookkeeping shared by both client kinds.
struct Lifecycle {
    phase: Mutex<Phase>,
    capabilities: OnceCell<Vec<String>>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Uninitialized),
            capabilities: OnceCell::new(),
        }
    }

    fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Fails unless `initiate_connection` ran and `dispose` did not.
    fn require_active(&self) -> Result<(), ClientError> {
        match self.phase() {
            Phase::Uninitialized => Err(ClientError::NotInitiated),
            Phase::Disposed => Err(ClientError::Disposed),
            Phase::Connecting | Phase::Connected => Ok(()),
        }
    }

    fn mark_connected(&self) {
        let mut phase = self.phase.lock();
        if *phase == Phase::Connecting {
            *phase = Phase::Connected;
        }
    }

    /// Connected as soon as any target has attached.
    fn observe(&self, targets: &TargetSet) {
        if targets.connected() > 0 {
            self.mark_connected();
        }
    }
}

// =============================================================================
// Agent client
// =============================================================================

/// In-process agent of a launched project, reached over a local socket.
pub struct AgentClient {
    project: String,
    pipe_name: String,
    /// Project-declared capabilities, override what the agent reports
    declared: Option<Vec<String>>,
    lifecycle: Lifecycle,
    applier: DeltaApplier,
    announced: Arc<CapabilitySlot>,
    server: Mutex<Option<AgentServer>>,
}

impl AgentClient {
    pub fn new(project: impl Into<String>, pipe_name: impl Into<String>, declared: Option<Vec<String>>) -> Self {
        Self {
            project: project.into(),
            pipe_name: pipe_name.into(),
            declared,
            lifecycle: Lifecycle::new(),
            applier: DeltaApplier::new(
                "agent",
                Arc::new(TargetSet::new()),
                uuid::Uuid::new_v4().simple().to_string(),
            ),
            announced: Arc::new(watch::Sender::new(None)),
            server: Mutex::new(None),
        }
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    /// Endpoint of the listening socket, once initiated.
    pub fn endpoint(&self) -> Option<String> {
        self.server.lock().as_ref().map(|s| s.endpoint().to_owned())
    }

    fn initiate_connection(&self) -> Result<(), ClientError> {
        let mut phase = self.lifecycle.phase.lock();
        match *phase {
            Phase::Disposed => return Err(ClientError::Disposed),
            Phase::Connecting | Phase::Connected => return Ok(()),
            Phase::Uninitialized => {}
        }

        let server = AgentServer::start(
            &self.pipe_name,
            Arc::clone(self.applier.targets()),
            Arc::clone(&self.announced),
        )?;
        *self.server.lock() = Some(server);
        *phase = Phase::Connecting;
        Ok(())
    }

    async fn wait_for_connection_established(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.lifecycle.require_active()?;

        let mut announced = self.announced.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            ready = announced.wait_for(Option::is_some) => {
                ready.map_err(|_| ClientError::Disposed)?;
            }
        }

        self.lifecycle.mark_connected();
        Ok(())
    }

    /// Declared list, or what the agent announced. Fails with
    /// `TransportUnavailable` while no agent is attached.
    async fn get_update_capabilities(&self, cancel: &CancellationToken) -> Result<Vec<String>, ClientError> {
        self.lifecycle.require_active()?;
        if let Some(declared) = &self.declared {
            return Ok(declared.clone());
        }
        if let Some(cached) = self.lifecycle.capabilities.get() {
            return Ok(cached.clone());
        }

        let announced = self.announced.borrow().is_some();
        if !announced {
            if self.applier.targets().connected() == 0 {
                return Err(ClientError::TransportUnavailable);
            }
            // Attached, the capability frame is on its way
            self.wait_for_connection_established(cancel).await?;
        }

        let announced = self.announced.borrow().clone().unwrap_or_default();
        let capabilities = self
            .lifecycle
            .capabilities
            .get_or_init(move || async move { announced })
            .await;
        Ok(capabilities.clone())
    }

    fn initial_updates_applied(&self) -> Result<(), ClientError> {
        self.lifecycle.require_active()?;

        let payload = serde_json::to_string(&InitialUpdatesCompleted::new(self.applier.shared_secret()))?;
        if self.applier.targets().notify(&payload) > 0 {
            crate::debug!("agent"; "sent InitialUpdatesCompleted");
        }
        Ok(())
    }

    fn dispose(&self) {
        *self.lifecycle.phase.lock() = Phase::Disposed;
        if let Some(server) = self.server.lock().take() {
            server.shutdown();
        }
        self.applier.targets().close_all();
    }
}

// =============================================================================
// Browser client
// =============================================================================

/// WebAssembly runtime in every browser tab attached to the refresh server.
pub struct BrowserClient {
    project: String,
    server: Arc<BrowserRefreshServer>,
    declared: Option<Vec<String>>,
    framework_version: Option<u32>,
    lifecycle: Lifecycle,
    applier: DeltaApplier,
}

impl BrowserClient {
    pub fn new(
        project: impl Into<String>,
        server: Arc<BrowserRefreshServer>,
        declared: Option<Vec<String>>,
        framework_version: Option<u32>,
    ) -> Self {
        let applier = DeltaApplier::new(
            "browser",
            Arc::clone(server.targets()),
            server.token().to_owned(),
        );
        Self {
            project: project.into(),
            server,
            declared,
            framework_version,
            lifecycle: Lifecycle::new(),
            applier,
        }
    }

    pub fn server(&self) -> &Arc<BrowserRefreshServer> {
        &self.server
    }

    fn initiate_connection(&self) -> Result<(), ClientError> {
        let mut phase = self.lifecycle.phase.lock();
        match *phase {
            Phase::Disposed => Err(ClientError::Disposed),
            Phase::Uninitialized => {
                *phase = Phase::Connecting;
                Ok(())
            }
            Phase::Connecting | Phase::Connected => Ok(()),
        }
    }

    async fn wait_for_connection_established(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.lifecycle.require_active()?;
        self.server.wait_for_client(cancel).await?;
        self.lifecycle.mark_connected();
        Ok(())
    }

    async fn get_update_capabilities(&self) -> Result<Vec<String>, ClientError> {
        self.lifecycle.require_active()?;

        let capabilities = self
            .lifecycle
            .capabilities
            .get_or_init(|| async {
                self.declared
                    .clone()
                    .unwrap_or_else(|| capabilities::browser_fallback(self.framework_version))
            })
            .await;

        Ok(capabilities.clone())
    }

    fn dispose(&self) {
        *self.lifecycle.phase.lock() = Phase::Disposed;
    }
}

// =============================================================================
// Dispatch
// =============================================================================

pub enum HotReloadClient {
    Agent(AgentClient),
    Browser(BrowserClient),
}

impl HotReloadClient {
    /// Log prefix and display name of the client kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Browser(_) => "browser",
        }
    }

    /// Project whose runtime this client talks to.
    pub fn project(&self) -> &str {
        match self {
            Self::Agent(c) => &c.project,
            Self::Browser(c) => &c.project,
        }
    }

    pub fn phase(&self) -> Phase {
        let lifecycle = self.lifecycle();
        lifecycle.observe(self.applier().targets());
        lifecycle.phase()
    }

    fn lifecycle(&self) -> &Lifecycle {
        match self {
            Self::Agent(c) => &c.lifecycle,
            Self::Browser(c) => &c.lifecycle,
        }
    }

    fn applier(&self) -> &DeltaApplier {
        match self {
            Self::Agent(c) => &c.applier,
            Self::Browser(c) => &c.applier,
        }
    }

    /// Start listening for the runtime. Idempotent.
    pub fn initiate_connection(&self) -> Result<(), ClientError> {
        match self {
            Self::Agent(c) => c.initiate_connection(),
            Self::Browser(c) => c.initiate_connection(),
        }
    }

    /// Wait until the runtime is reachable (agent initialized, first tab open).
    pub async fn wait_for_connection_established(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        match self {
            Self::Agent(c) => c.wait_for_connection_established(cancel).await,
            Self::Browser(c) => c.wait_for_connection_established(cancel).await,
        }
    }

    /// Negotiated capabilities, computed once per session.
    pub async fn get_update_capabilities(&self, cancel: &CancellationToken) -> Result<Vec<String>, ClientError> {
        match self {
            Self::Agent(c) => c.get_update_capabilities(cancel).await,
            Self::Browser(c) => c.get_update_capabilities().await,
        }
    }

    pub async fn apply_managed_code_updates(
        &self,
        updates: &[ManagedCodeUpdate],
        is_process_suspended: bool,
        cancel: &CancellationToken,
    ) -> Result<ApplyStatus, ClientError> {
        self.lifecycle().require_active()?;
        let capabilities = match self.get_update_capabilities(cancel).await {
            Err(ClientError::TransportUnavailable) => {
                crate::debug!(self.kind(); "{} has no runtime attached, assuming applied", self.project());
                return Ok(ApplyStatus::AllChangesApplied);
            }
            capabilities => capabilities?,
        };
        self.applier()
            .apply_managed(updates, &capabilities, is_process_suspended, cancel)
            .await
    }

    /// Static assets go to the agent. Browser tabs receive them through the
    /// refresh server, so the browser client reports no changes.
    pub async fn apply_static_asset_updates(
        &self,
        assets: &[StaticAssetUpdate],
        is_process_suspended: bool,
        cancel: &CancellationToken,
    ) -> Result<ApplyStatus, ClientError> {
        self.lifecycle().require_active()?;
        match self {
            Self::Agent(c) => c.applier.apply_assets(assets, is_process_suspended, cancel).await,
            Self::Browser(_) => Ok(ApplyStatus::NoChangesApplied),
        }
    }

    /// Tell the runtime the startup replay is done. Fire-and-forget.
    pub fn initial_updates_applied(&self) -> Result<(), ClientError> {
        match self {
            Self::Agent(c) => c.initial_updates_applied(),
            Self::Browser(c) => c.lifecycle.require_active(),
        }
    }

    /// Update ids sent but not yet confirmed.
    pub async fn pending_update_ids(&self) -> Vec<u64> {
        self.applier().pending_ids().await
    }

    pub fn dispose(&self) {
        match self {
            Self::Agent(c) => c.dispose(),
            Self::Browser(c) => c.dispose(),
        }
    }
}
