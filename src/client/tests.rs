use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::applier::DeltaApplier;
use super::fanout::TargetSet;
use super::protocol::Reply;
use super::*;
use crate::core::{ApplyStatus, ManagedCodeUpdate, TargetOutcome};

fn update(required: &[&str]) -> ManagedCodeUpdate {
    ManagedCodeUpdate {
        module_id: Uuid::new_v4(),
        metadata_delta: vec![1],
        il_delta: vec![2],
        pdb_delta: vec![3],
        updated_types: vec![],
        required_capabilities: required.iter().map(|s| s.to_string()).collect(),
    }
}

fn reply(outcome: TargetOutcome) -> Reply {
    Reply {
        outcome,
        log: Vec::new(),
    }
}

fn baseline() -> Vec<String> {
    vec!["Baseline".to_string()]
}

fn make_applier() -> Arc<DeltaApplier> {
    Arc::new(DeltaApplier::new(
        "agent",
        Arc::new(TargetSet::new()),
        "secret".to_string(),
    ))
}

fn update_id(payload: &str) -> u64 {
    let value: Value = serde_json::from_str(payload).unwrap();
    value["UpdateId"].as_u64().unwrap()
}

async fn next_id(outbox: &mut UnboundedReceiver<String>) -> u64 {
    update_id(&outbox.recv().await.unwrap())
}

/// Give spawned tasks time to reach their next await point.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// =============================================================================
// Suspend-aware ordering
// =============================================================================

#[tokio::test]
async fn test_suspended_updates_confirmed_before_new_batch() {
    let applier = make_applier();
    let (target, mut outbox) = applier.targets().attach();
    let cancel = CancellationToken::new();

    let u1 = applier
        .apply_managed(&[update(&[])], &baseline(), true, &cancel)
        .await
        .unwrap();
    let u2 = applier
        .apply_managed(&[update(&[])], &baseline(), true, &cancel)
        .await
        .unwrap();
    assert_eq!(u1, ApplyStatus::AllChangesApplied);
    assert_eq!(u2, ApplyStatus::AllChangesApplied);
    assert_eq!(applier.pending_ids().await, vec![0, 1]);
    assert_eq!(next_id(&mut outbox).await, 0);
    assert_eq!(next_id(&mut outbox).await, 1);

    let task = {
        let applier = Arc::clone(&applier);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            applier
                .apply_managed(&[update(&[])], &baseline(), false, &cancel)
                .await
        })
    };

    // U3 is held back until U1 and U2 are confirmed
    settle().await;
    assert!(outbox.try_recv().is_err());

    applier.targets().complete(target, reply(TargetOutcome::Succeeded));
    settle().await;
    assert!(outbox.try_recv().is_err());

    applier.targets().complete(target, reply(TargetOutcome::Succeeded));
    assert_eq!(next_id(&mut outbox).await, 2);

    applier.targets().complete(target, reply(TargetOutcome::Succeeded));
    let status = task.await.unwrap().unwrap();
    assert_eq!(status, ApplyStatus::AllChangesApplied);
    assert!(applier.pending_ids().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_confirmation_reconciled_later() {
    let applier = make_applier();
    let (target, mut outbox) = applier.targets().attach();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result = applier
        .apply_managed(&[update(&[])], &baseline(), false, &cancel)
        .await;
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert_eq!(applier.pending_ids().await, vec![0]);
    assert_eq!(next_id(&mut outbox).await, 0);

    // Late reply for #0, then a fresh call drains it and sends #1
    applier.targets().complete(target, reply(TargetOutcome::Rejected));

    let cancel = CancellationToken::new();
    let task = {
        let applier = Arc::clone(&applier);
        tokio::spawn(async move {
            applier
                .apply_managed(&[update(&[])], &baseline(), false, &cancel)
                .await
        })
    };

    assert_eq!(next_id(&mut outbox).await, 1);
    applier.targets().complete(target, reply(TargetOutcome::Succeeded));

    assert_eq!(
        task.await.unwrap().unwrap(),
        ApplyStatus::AllChangesApplied
    );
    assert!(applier.pending_ids().await.is_empty());
}

// =============================================================================
// Aggregation across targets
// =============================================================================

async fn apply_with_replies(outcomes: &[TargetOutcome]) -> ApplyStatus {
    let applier = make_applier();
    let targets: Vec<_> = outcomes.iter().map(|_| applier.targets().attach()).collect();

    let task = {
        let applier = Arc::clone(&applier);
        tokio::spawn(async move {
            applier
                .apply_managed(&[update(&[])], &baseline(), false, &CancellationToken::new())
                .await
        })
    };

    for ((id, mut outbox), outcome) in targets.into_iter().zip(outcomes) {
        outbox.recv().await.unwrap();
        match outcome {
            TargetOutcome::Disconnected => applier.targets().disconnect(id),
            other => applier.targets().complete(id, reply(*other)),
        }
    }

    task.await.unwrap().unwrap()
}

#[tokio::test]
async fn test_aggregation_across_targets() {
    use TargetOutcome::*;

    assert_eq!(
        apply_with_replies(&[Succeeded, Succeeded, Rejected]).await,
        ApplyStatus::AllChangesApplied
    );
    assert_eq!(
        apply_with_replies(&[Rejected, Rejected]).await,
        ApplyStatus::Failed
    );
    assert_eq!(
        apply_with_replies(&[ProtocolMismatch, Disconnected]).await,
        ApplyStatus::Failed
    );
    assert_eq!(
        apply_with_replies(&[Succeeded, Disconnected]).await,
        ApplyStatus::AllChangesApplied
    );
    assert_eq!(apply_with_replies(&[]).await, ApplyStatus::AllChangesApplied);
}

#[tokio::test]
async fn test_inapplicable_updates_filtered() {
    let applier = make_applier();
    let (target, mut outbox) = applier.targets().attach();
    let cancel = CancellationToken::new();

    let status = applier
        .apply_managed(&[update(&["NewTypeDefinition"])], &baseline(), false, &cancel)
        .await
        .unwrap();
    assert_eq!(status, ApplyStatus::NoChangesApplied);
    assert!(outbox.try_recv().is_err());

    let task = {
        let applier = Arc::clone(&applier);
        tokio::spawn(async move {
            let batch = [update(&["Baseline"]), update(&["NewTypeDefinition"])];
            applier
                .apply_managed(&batch, &baseline(), false, &CancellationToken::new())
                .await
        })
    };

    let payload: Value = serde_json::from_str(&outbox.recv().await.unwrap()).unwrap();
    assert_eq!(payload["Deltas"].as_array().unwrap().len(), 1);
    applier.targets().complete(target, reply(TargetOutcome::Succeeded));

    assert_eq!(
        task.await.unwrap().unwrap(),
        ApplyStatus::SomeChangesApplied
    );
}

#[tokio::test]
async fn test_suspended_partial_batch_is_optimistic_some() {
    let applier = make_applier();
    let status = applier
        .apply_managed(
            &[update(&[]), update(&["GenericUpdateMethod"])],
            &baseline(),
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(status, ApplyStatus::SomeChangesApplied);
}

// =============================================================================
// Browser client over a real WebSocket
// =============================================================================

async fn connect_tab(
    server: &BrowserRefreshServer,
    token: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    tokio_tungstenite::tungstenite::Error,
> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

    let mut request = server.url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, token.parse().unwrap());
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(ws, _)| ws)
}

#[tokio::test]
async fn test_browser_tab_round_trip() {
    let server = Arc::new(BrowserRefreshServer::start("127.0.0.1", 0).await.unwrap());
    let client = HotReloadClient::Browser(BrowserClient::new(
        "client.csproj",
        Arc::clone(&server),
        None,
        Some(8),
    ));
    let cancel = CancellationToken::new();

    client.initiate_connection().unwrap();
    let mut tab = connect_tab(&server, server.token()).await.unwrap();
    client.wait_for_connection_established(&cancel).await.unwrap();
    assert_eq!(client.phase(), Phase::Connected);
    assert_eq!(client.get_update_capabilities(&cancel).await.unwrap().len(), 11);

    let apply = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let status = client
                .apply_managed_code_updates(&[update(&["Baseline"])], false, &cancel)
                .await;
            (client, status)
        })
    };

    let request = match tab.next().await.unwrap().unwrap() {
        tokio_tungstenite::tungstenite::Message::Text(text) => {
            serde_json::from_str::<Value>(text.as_str()).unwrap()
        }
        other => panic!("unexpected message: {other:?}"),
    };
    assert_eq!(request["Type"], "ManagedCodeUpdate");
    assert_eq!(request["SharedSecret"], server.token());
    assert_eq!(request["Deltas"][0]["ILDelta"], "Ag==");

    tab.send(tokio_tungstenite::tungstenite::Message::Text(
        r#"{"Success": true, "Log": [{"Message": "applied", "Severity": 0}]}"#.into(),
    ))
    .await
    .unwrap();

    let (client, status) = apply.await.unwrap();
    assert_eq!(status.unwrap(), ApplyStatus::AllChangesApplied);

    assert_eq!(
        client
            .apply_static_asset_updates(&[], false, &cancel)
            .await
            .unwrap(),
        ApplyStatus::NoChangesApplied
    );

    client.dispose();
    assert!(matches!(
        client
            .apply_managed_code_updates(&[update(&[])], false, &cancel)
            .await,
        Err(ClientError::Disposed)
    ));
}

#[tokio::test]
async fn test_browser_rejects_wrong_token() {
    let server = BrowserRefreshServer::start("127.0.0.1", 0).await.unwrap();
    assert!(connect_tab(&server, "wrong").await.is_err());
    assert_eq!(server.connected(), 0);
}

#[tokio::test]
async fn test_browser_refresh_reaches_tab() {
    let server = BrowserRefreshServer::start("127.0.0.1", 0).await.unwrap();
    let mut tab = connect_tab(&server, server.token()).await.unwrap();
    server
        .wait_for_client(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(server.update_static_file("css/site.css"), 1);
    let message = tab.next().await.unwrap().unwrap();
    assert_eq!(
        message.into_text().unwrap().as_str(),
        r#"{"Type":"UpdateStaticFile","Path":"css/site.css"}"#
    );
}

#[tokio::test]
async fn test_browser_lifecycle_errors() {
    let server = Arc::new(BrowserRefreshServer::start("127.0.0.1", 0).await.unwrap());
    let declared = Some(vec!["Baseline".to_string(), "Custom".to_string()]);
    let client = HotReloadClient::Browser(BrowserClient::new("app", server, declared, Some(6)));
    let cancel = CancellationToken::new();

    assert!(matches!(
        client.get_update_capabilities(&cancel).await,
        Err(ClientError::NotInitiated)
    ));

    client.initiate_connection().unwrap();
    assert_eq!(
        client.get_update_capabilities(&cancel).await.unwrap(),
        vec!["Baseline", "Custom"]
    );

    // No tabs: assume applied
    assert_eq!(
        client
            .apply_managed_code_updates(&[update(&[])], false, &cancel)
            .await
            .unwrap(),
        ApplyStatus::AllChangesApplied
    );
}

// =============================================================================
// Agent client over a local socket
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_agent_handshake_and_apply() {
    use tokio_util::bytes::Bytes;
    use tokio_util::codec::{Framed, LengthDelimitedCodec};

    let pipe_name = format!("deltawatch-test-{}", Uuid::new_v4().simple());
    let client = HotReloadClient::Agent(AgentClient::new("server.csproj", pipe_name, None));
    let cancel = CancellationToken::new();

    client.initiate_connection().unwrap();
    let endpoint = match &client {
        HotReloadClient::Agent(agent) => agent.endpoint().unwrap(),
        HotReloadClient::Browser(_) => unreachable!(),
    };

    let stream = tokio::net::UnixStream::connect(&endpoint).await.unwrap();
    let mut agent = Framed::new(stream, LengthDelimitedCodec::new());
    agent
        .send(Bytes::from_static(b"{\"Capabilities\": \"Baseline AddMethodToExistingType\"}"))
        .await
        .unwrap();

    client.wait_for_connection_established(&cancel).await.unwrap();
    assert_eq!(
        client.get_update_capabilities(&cancel).await.unwrap(),
        vec!["Baseline", "AddMethodToExistingType"]
    );

    let apply = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let status = client
                .apply_managed_code_updates(&[update(&["AddMethodToExistingType"])], false, &cancel)
                .await;
            (client, status)
        })
    };

    let frame = agent.next().await.unwrap().unwrap();
    let request: Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(request["UpdateId"], 0);
    agent
        .send(Bytes::from_static(b"{\"Success\": false, \"Log\": [{\"Message\": \"boom\", \"Severity\": 2}]}"))
        .await
        .unwrap();

    let (client, status) = apply.await.unwrap();
    assert_eq!(status.unwrap(), ApplyStatus::Failed);

    client.initial_updates_applied().unwrap();
    let frame = agent.next().await.unwrap().unwrap();
    let notification: Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(notification["Type"], "InitialUpdatesCompleted");

    client.dispose();
    assert!(!std::path::Path::new(&endpoint).exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_agent_declared_capabilities_override() {
    let pipe_name = format!("deltawatch-test-{}", Uuid::new_v4().simple());
    let declared = Some(vec!["Baseline".to_string()]);
    let client = HotReloadClient::Agent(AgentClient::new("app", pipe_name, declared));
    let cancel = CancellationToken::new();

    client.initiate_connection().unwrap();
    // Answered without any agent connecting
    assert_eq!(
        client.get_update_capabilities(&cancel).await.unwrap(),
        vec!["Baseline"]
    );
    client.dispose();
}
