//! Local endpoint the in-process agent connects to.
//!
//! A Unix domain socket under the temp directory (named pipe on Windows),
//! carrying length-prefixed JSON frames. The agent opens with a
//! `{Capabilities}` frame; afterwards every request gets exactly one
//! response frame, in order.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use super::ClientError;
use super::fanout::TargetSet;
use super::protocol::{ClientInitialization, parse_reply};

/// Capabilities announced by the agent, `None` until it connects.
pub type CapabilitySlot = watch::Sender<Option<Vec<String>>>;

pub struct AgentServer {
    endpoint: String,
    shutdown: CancellationToken,
}

impl AgentServer {
    /// Create the endpoint and wait for one agent in the background.
    pub fn start(
        pipe_name: &str,
        targets: Arc<TargetSet>,
        capabilities: Arc<CapabilitySlot>,
    ) -> Result<Self, ClientError> {
        let (listener, endpoint) = platform::listen(pipe_name).map_err(|source| ClientError::Bind {
            what: "agent endpoint",
            source,
        })?;

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let stream = tokio::select! {
                _ = token.cancelled() => return,
                stream = platform::accept(listener) => stream,
            };
            match stream {
                Ok(stream) => serve(stream, targets, capabilities, token).await,
                Err(e) => crate::log!("agent"; "failed to accept agent connection: {}", e),
            }
        });

        crate::debug!("agent"; "waiting for agent on {}", endpoint);
        Ok(Self { endpoint, shutdown })
    }

    /// Path (or pipe name) handed to the launched process.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        platform::cleanup(&self.endpoint);
    }
}

impl Drop for AgentServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve<S>(
    stream: S,
    targets: Arc<TargetSet>,
    capabilities: Arc<CapabilitySlot>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let first = tokio::select! {
        _ = shutdown.cancelled() => return,
        first = framed.next() => first,
    };
    let tokens = match first {
        Some(Ok(frame)) => match serde_json::from_slice::<ClientInitialization>(&frame) {
            Ok(init) => init.tokens(),
            Err(e) => {
                crate::log!("agent"; "failed to read capabilities: {}", e);
                Vec::new()
            }
        },
        Some(Err(e)) => {
            crate::log!("agent"; "failed to read capabilities: {}", e);
            Vec::new()
        }
        None => {
            crate::debug!("agent"; "agent closed the connection before initializing");
            return;
        }
    };

    let (mut sink, mut source) = framed.split();
    let (id, mut outbox) = targets.attach();

    // Ends once `disconnect` drops the outbox sender
    tokio::spawn(async move {
        while let Some(payload) = outbox.recv().await {
            if sink.send(Bytes::from(payload)).await.is_err() {
                break;
            }
        }
    });

    crate::log!("agent"; "agent connected");
    crate::debug!("agent"; "capabilities: {}", tokens.join(" "));
    capabilities.send_replace(Some(tokens));

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = source.next() => frame,
        };
        match frame {
            Some(Ok(frame)) => targets.complete(id, parse_reply(&frame)),
            Some(Err(e)) => {
                crate::debug!("agent"; "read error: {}", e);
                break;
            }
            None => break,
        }
    }

    targets.disconnect(id);
    crate::log!("agent"; "agent disconnected");
}

#[cfg(unix)]
mod platform {
    use std::io;

    use tokio::net::{UnixListener, UnixStream};

    pub(super) fn listen(pipe_name: &str) -> io::Result<(UnixListener, String)> {
        let path = std::env::temp_dir().join(pipe_name);
        // Stale socket from a crashed session
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        Ok((listener, path.to_string_lossy().into_owned()))
    }

    pub(super) async fn accept(listener: UnixListener) -> io::Result<UnixStream> {
        listener.accept().await.map(|(stream, _)| stream)
    }

    pub(super) fn cleanup(endpoint: &str) {
        let _ = std::fs::remove_file(endpoint);
    }
}

#[cfg(windows)]
mod platform {
    use std::io;

    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

    pub(super) fn listen(pipe_name: &str) -> io::Result<(NamedPipeServer, String)> {
        let endpoint = format!(r"\\.\pipe\{pipe_name}");
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&endpoint)?;
        Ok((server, endpoint))
    }

    pub(super) async fn accept(server: NamedPipeServer) -> io::Result<NamedPipeServer> {
        server.connect().await?;
        Ok(server)
    }

    pub(super) fn cleanup(_endpoint: &str) {}
}
