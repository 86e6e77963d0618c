//! The session's hot reload clients, driven together.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::client::{BrowserRefreshServer, ClientError, HotReloadClient, Phase, capabilities};
use crate::core::{ApplyStatus, UpdateBatch};
use crate::logger;

/// Result of one batch on one client.
#[derive(Debug)]
pub struct ClientReport {
    pub kind: &'static str,
    pub project: String,
    pub result: Result<ApplyStatus, ClientError>,
}

impl ClientReport {
    fn line(&self) -> String {
        match &self.result {
            Ok(status) => format!("{} {}: {}", self.kind, self.project, status),
            Err(e) => format!("{} {}: {}", self.kind, self.project, e),
        }
    }

    fn applied_any(&self) -> bool {
        matches!(
            self.result,
            Ok(ApplyStatus::AllChangesApplied | ApplyStatus::SomeChangesApplied)
        )
    }

    fn is_failure(&self) -> bool {
        match &self.result {
            Ok(status) => status.is_failed(),
            Err(_) => true,
        }
    }
}

pub struct ClientSet {
    clients: Vec<HotReloadClient>,
    browser: Option<Arc<BrowserRefreshServer>>,
}

impl ClientSet {
    pub fn new(clients: Vec<HotReloadClient>, browser: Option<Arc<BrowserRefreshServer>>) -> Self {
        Self { clients, browser }
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clients(&self) -> &[HotReloadClient] {
        &self.clients
    }

    pub fn initiate(&self) -> Result<(), ClientError> {
        for client in &self.clients {
            client.initiate_connection()?;
        }
        Ok(())
    }

    /// Wait for every client, each bounded by `timeout`.
    ///
    /// A client that does not connect in time is left in `Connecting`.
    /// Updates for it are assumed applied until a target attaches.
    pub async fn connect(&self, timeout: Duration, cancel: &CancellationToken) -> Result<(), ClientError> {
        let attempts = self.clients.iter().map(|client| async move {
            match tokio::time::timeout(timeout, client.wait_for_connection_established(cancel)).await {
                Ok(Ok(())) => {
                    crate::log!(client.kind(); "{} connected", client.project());
                    Ok(())
                }
                Ok(Err(ClientError::Cancelled)) => Err(ClientError::Cancelled),
                Ok(Err(e)) => {
                    crate::log!(client.kind(); "{} failed to connect: {}", client.project(), e);
                    Ok(())
                }
                Err(_) => {
                    crate::log!(
                        client.kind();
                        "{} did not connect within {}s, updates are assumed applied until it does",
                        client.project(),
                        timeout.as_secs()
                    );
                    Ok(())
                }
            }
        });

        join_all(attempts).await.into_iter().collect()
    }

    /// Ordered, de-duplicated union of the capabilities known so far.
    pub async fn aggregate_capabilities(&self, cancel: &CancellationToken) -> Result<Vec<String>, ClientError> {
        let mut lists = Vec::new();
        for client in self.active() {
            match client.get_update_capabilities(cancel).await {
                Ok(list) => lists.push(list),
                Err(ClientError::TransportUnavailable) => {
                    crate::debug!(client.kind(); "{} has not reported capabilities yet", client.project());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(capabilities::union(lists.iter().map(Vec::as_slice)))
    }

    /// Tell every client the startup replay is over.
    pub fn initial_updates_applied(&self) {
        for client in self.active() {
            if let Err(e) = client.initial_updates_applied() {
                crate::debug!(client.kind(); "initial updates notification failed: {}", e);
            }
        }
    }

    /// Apply one batch to every client concurrently.
    pub async fn apply(&self, batch: &UpdateBatch, cancel: &CancellationToken) -> Vec<ClientReport> {
        if let Some(server) = &self.browser {
            for asset in &batch.assets {
                server.update_static_file(&asset.asset_path);
            }
        }

        let applies = self.clients.iter().map(|client| async move {
            ClientReport {
                kind: client.kind(),
                project: client.project().to_string(),
                result: apply_to(client, batch, cancel).await,
            }
        });
        join_all(applies).await
    }

    /// Reload every tab; server apps have no in-browser runtime to patch.
    pub fn refresh_browser(&self) {
        if let Some(server) = &self.browser {
            let tabs = server.refresh();
            crate::debug!("browser"; "refresh sent to {} tab(s)", tabs);
        }
    }

    pub async fn pending_update_ids(&self) -> Vec<(&'static str, Vec<u64>)> {
        let mut pending = Vec::new();
        for client in &self.clients {
            pending.push((client.kind(), client.pending_update_ids().await));
        }
        pending
    }

    pub fn dispose(&self) {
        for client in &self.clients {
            client.dispose();
        }
        if let Some(server) = &self.browser {
            server.shutdown();
        }
    }

    fn active(&self) -> impl Iterator<Item = &HotReloadClient> {
        self.clients
            .iter()
            .filter(|c| matches!(c.phase(), Phase::Connecting | Phase::Connected))
    }
}

async fn apply_to(
    client: &HotReloadClient,
    batch: &UpdateBatch,
    cancel: &CancellationToken,
) -> Result<ApplyStatus, ClientError> {
    let mut status = ApplyStatus::NoChangesApplied;
    if !batch.managed.is_empty() {
        let managed = client
            .apply_managed_code_updates(&batch.managed, batch.process_suspended, cancel)
            .await?;
        status = status.merge(managed);
    }
    if !batch.assets.is_empty() {
        let assets = client
            .apply_static_asset_updates(&batch.assets, batch.process_suspended, cancel)
            .await?;
        status = status.merge(assets);
    }
    Ok(status)
}

/// Whether any client took at least part of the batch.
pub fn applied_any(reports: &[ClientReport]) -> bool {
    reports.iter().any(ClientReport::applied_any)
}

/// Render one status block for a batch.
pub fn report(reports: &[ClientReport]) {
    if reports.is_empty() {
        logger::status_unchanged("no client to apply changes to");
        return;
    }

    let lines: Vec<_> = reports.iter().map(ClientReport::line).collect();
    let failed = reports.iter().any(ClientReport::is_failure);
    let unchanged = reports
        .iter()
        .all(|r| matches!(r.result, Ok(ApplyStatus::NoChangesApplied)));

    if failed {
        logger::status_error(&lines[0], &lines[1..].join("\n"));
    } else if unchanged {
        logger::status_unchanged(&lines.join("\n"));
    } else {
        logger::status_success(&lines.join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::client::BrowserClient;
    use crate::core::ManagedCodeUpdate;

    fn browser_set(server: &Arc<BrowserRefreshServer>) -> ClientSet {
        let client = HotReloadClient::Browser(BrowserClient::new("Client", Arc::clone(server), None, Some(8)));
        ClientSet::new(vec![client], Some(Arc::clone(server)))
    }

    fn one_delta() -> UpdateBatch {
        UpdateBatch {
            managed: vec![ManagedCodeUpdate {
                module_id: uuid::Uuid::new_v4(),
                metadata_delta: vec![1],
                il_delta: vec![2],
                pdb_delta: vec![],
                updated_types: vec![],
                required_capabilities: vec!["Baseline".to_string()],
            }],
            ..Default::default()
        }
    }

    fn report_of(result: Result<ApplyStatus, ClientError>) -> ClientReport {
        ClientReport {
            kind: "agent",
            project: "App".to_string(),
            result,
        }
    }

    #[test]
    fn test_report_line() {
        assert_eq!(
            report_of(Ok(ApplyStatus::SomeChangesApplied)).line(),
            format!("agent App: {}", ApplyStatus::SomeChangesApplied)
        );
        assert!(report_of(Err(ClientError::Disposed)).line().contains("disposed"));
    }

    #[test]
    fn test_report_failure() {
        assert!(report_of(Ok(ApplyStatus::Failed)).is_failure());
        assert!(report_of(Err(ClientError::Cancelled)).is_failure());
        assert!(!report_of(Ok(ApplyStatus::NoChangesApplied)).is_failure());
    }

    #[test]
    fn test_applied_any() {
        assert!(applied_any(&[
            report_of(Ok(ApplyStatus::NoChangesApplied)),
            report_of(Ok(ApplyStatus::SomeChangesApplied)),
        ]));
        assert!(!applied_any(&[
            report_of(Ok(ApplyStatus::NoChangesApplied)),
            report_of(Err(ClientError::Cancelled)),
        ]));
    }

    #[tokio::test]
    async fn test_unconnected_client_assumed_applied() {
        let server = Arc::new(BrowserRefreshServer::start("127.0.0.1", 0).await.unwrap());
        let set = browser_set(&server);
        set.initiate().unwrap();

        let reports = set.apply(&one_delta(), &CancellationToken::new()).await;
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0].result, Ok(ApplyStatus::AllChangesApplied)));

        set.dispose();
    }

    #[tokio::test]
    async fn test_connect_times_out_without_failing() {
        let server = Arc::new(BrowserRefreshServer::start("127.0.0.1", 0).await.unwrap());
        let set = browser_set(&server);
        set.initiate().unwrap();

        let cancel = CancellationToken::new();
        set.connect(Duration::from_millis(20), &cancel).await.unwrap();
        assert_eq!(set.clients()[0].phase(), Phase::Connecting);
        assert_eq!(
            set.aggregate_capabilities(&cancel).await.unwrap(),
            capabilities::browser_fallback(Some(8))
        );
    }

    #[tokio::test]
    async fn test_tab_attaching_after_timeout_receives_updates() {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

        let server = Arc::new(BrowserRefreshServer::start("127.0.0.1", 0).await.unwrap());
        let set = browser_set(&server);
        set.initiate().unwrap();
        let cancel = CancellationToken::new();
        set.connect(Duration::from_millis(20), &cancel).await.unwrap();
        assert_eq!(set.clients()[0].phase(), Phase::Connecting);

        let mut request = server.url().into_client_request().unwrap();
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, server.token().parse().unwrap());
        let (mut tab, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        server.wait_for_client(&cancel).await.unwrap();
        assert_eq!(set.clients()[0].phase(), Phase::Connected);

        let batch = one_delta();
        let (reports, request) = tokio::join!(set.apply(&batch, &cancel), async {
            let message = tab.next().await.unwrap().unwrap();
            let request: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
            tab.send(Message::Text(r#"{"Success": true, "Log": []}"#.into()))
                .await
                .unwrap();
            request
        });

        assert_eq!(request["Type"], "ManagedCodeUpdate");
        assert!(matches!(reports[0].result, Ok(ApplyStatus::AllChangesApplied)));
        set.dispose();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unattached_agent_assumed_applied() {
        let pipe_name = format!("deltawatch-test-{}", uuid::Uuid::new_v4().simple());
        let client = HotReloadClient::Agent(crate::client::AgentClient::new("Server", pipe_name, None));
        let set = ClientSet::new(vec![client], None);
        set.initiate().unwrap();

        // Returns at once instead of waiting for the capability frame
        let cancel = CancellationToken::new();
        assert!(set.aggregate_capabilities(&cancel).await.unwrap().is_empty());
        let reports = tokio::time::timeout(Duration::from_secs(1), set.apply(&one_delta(), &cancel))
            .await
            .unwrap();
        assert!(matches!(reports[0].result, Ok(ApplyStatus::AllChangesApplied)));
        set.dispose();
    }

    #[tokio::test]
    async fn test_connect_cancelled() {
        let server = Arc::new(BrowserRefreshServer::start("127.0.0.1", 0).await.unwrap());
        let client = HotReloadClient::Browser(BrowserClient::new("Client", Arc::clone(&server), None, None));
        let set = ClientSet::new(vec![client], Some(server));
        set.initiate().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = set.connect(Duration::from_secs(5), &cancel).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }
}
