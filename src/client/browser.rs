//! Browser refresh server.
//!
//! Browser tabs connect over WebSocket, authenticating with the session
//! token sent as the WebSocket subprotocol. Every accepted tab becomes one
//! target of the shared [`TargetSet`]: delta requests fan out to all tabs,
//! refresh notifications are fire-and-forget.
//!
//! ```text
//! BrowserClient ──send──► TargetSet ──outbox──► writer task ──► tab
//!                            ▲                                  │
//!                            └──── complete ◄── reader task ◄───┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tungstenite::Message;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::{HeaderValue, StatusCode, header::SEC_WEBSOCKET_PROTOCOL};
use tokio_util::sync::CancellationToken;

use super::ClientError;
use super::fanout::TargetSet;
use super::protocol::parse_reply;

/// Maximum port retry attempts
const MAX_PORT_RETRIES: u16 = 10;

/// Messages pushed to every tab without expecting a response.
#[derive(Debug, Serialize)]
#[serde(tag = "Type")]
enum RefreshMessage<'a> {
    RefreshBrowser,
    UpdateStaticFile {
        #[serde(rename = "Path")]
        path: &'a str,
    },
}

pub struct BrowserRefreshServer {
    addr: SocketAddr,
    token: String,
    targets: Arc<TargetSet>,
    shutdown: CancellationToken,
}

impl BrowserRefreshServer {
    /// Bind and start accepting tabs.
    ///
    /// Port 0 picks an ephemeral port; any other port is retried upward
    /// while busy.
    pub async fn start(interface: &str, base_port: u16) -> Result<Self, ClientError> {
        let listener = try_bind_port(interface, base_port, MAX_PORT_RETRIES).await?;
        let addr = listener.local_addr().map_err(|source| ClientError::Bind {
            what: "browser refresh server",
            source,
        })?;

        let server = Self {
            addr,
            token: uuid::Uuid::new_v4().simple().to_string(),
            targets: Arc::new(TargetSet::new()),
            shutdown: CancellationToken::new(),
        };

        tokio::spawn(accept_loop(
            listener,
            server.token.clone(),
            Arc::clone(&server.targets),
            server.shutdown.clone(),
        ));

        crate::log!("browser"; "refresh server listening on {}", server.url());
        Ok(server)
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Bearer token tabs must present as their subprotocol.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn targets(&self) -> &Arc<TargetSet> {
        &self.targets
    }

    pub fn connected(&self) -> usize {
        self.targets.connected()
    }

    pub async fn wait_for_client(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.targets.wait_for_target(cancel).await
    }

    /// Ask every tab to reload the page.
    pub fn refresh(&self) -> usize {
        self.notify(&RefreshMessage::RefreshBrowser)
    }

    /// Tell every tab that a static file changed.
    pub fn update_static_file(&self, path: &str) -> usize {
        self.notify(&RefreshMessage::UpdateStaticFile { path })
    }

    fn notify(&self, message: &RefreshMessage<'_>) -> usize {
        match serde_json::to_string(message) {
            Ok(payload) => self.targets.notify(&payload),
            Err(e) => {
                crate::log!("browser"; "failed to encode refresh message: {}", e);
                0
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.targets.close_all();
    }
}

impl Drop for BrowserRefreshServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    listener: TcpListener,
    token: String,
    targets: Arc<TargetSet>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                crate::debug!("browser"; "tab connecting: {}", addr);
                tokio::spawn(serve_tab(
                    stream,
                    token.clone(),
                    Arc::clone(&targets),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                crate::log!("browser"; "accept error: {}", e);
            }
        }
    }
}

fn unauthorized(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_owned()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

/// Accept the handshake only if the requested subprotocol is the token.
fn authenticate(token: &str, request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let requested = request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    match requested {
        Some(protocol) if protocol == token => {
            let Ok(value) = HeaderValue::from_str(protocol) else {
                return Err(unauthorized("invalid subprotocol"));
            };
            response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
            Ok(response)
        }
        Some(_) => {
            crate::log!("browser"; "connection rejected: invalid token");
            Err(unauthorized("invalid token"))
        }
        None => {
            crate::log!("browser"; "connection rejected: missing token");
            Err(unauthorized("missing token"))
        }
    }
}

async fn serve_tab(
    stream: TcpStream,
    token: String,
    targets: Arc<TargetSet>,
    shutdown: CancellationToken,
) {
    let callback = |request: &Request, response: Response| authenticate(&token, request, response);
    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            crate::debug!("browser"; "handshake failed: {}", e);
            return;
        }
    };

    let (mut sink, mut source) = ws.split();
    let (id, mut outbox) = targets.attach();
    crate::debug!("browser"; "tab #{} connected (total: {})", id, targets.connected());

    // Ends once `disconnect` drops the outbox sender
    tokio::spawn(async move {
        while let Some(payload) = outbox.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = source.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => targets.complete(id, parse_reply(text.as_bytes())),
            Some(Ok(Message::Binary(bytes))) => targets.complete(id, parse_reply(&bytes)),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                crate::debug!("browser"; "tab #{} read error: {}", id, e);
                break;
            }
        }
    }

    targets.disconnect(id);
    crate::debug!("browser"; "tab #{} disconnected", id);
}

/// Try binding to port, retry with incremented port if in use
async fn try_bind_port(
    interface: &str,
    base_port: u16,
    max_retries: u16,
) -> Result<TcpListener, ClientError> {
    let attempts = if base_port == 0 { 1 } else { max_retries };
    let mut last_error = None;

    for offset in 0..attempts {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind((interface, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => last_error = Some(e),
        }
    }

    Err(ClientError::Bind {
        what: "browser refresh server",
        source: last_error.unwrap_or_else(|| std::io::Error::other("no port available")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_message_shape() {
        assert_eq!(
            serde_json::to_string(&RefreshMessage::RefreshBrowser).unwrap(),
            r#"{"Type":"RefreshBrowser"}"#
        );
        assert_eq!(
            serde_json::to_string(&RefreshMessage::UpdateStaticFile { path: "css/site.css" }).unwrap(),
            r#"{"Type":"UpdateStaticFile","Path":"css/site.css"}"#
        );
    }
}
