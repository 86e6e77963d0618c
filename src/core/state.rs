//! Process-wide shutdown state.
//!
//! Only the Ctrl+C signal is global. Everything a session owns (pending
//! queues, capability caches, watchers) lives on the session instance.

use std::sync::OnceLock;

use tokio_util::sync::CancellationToken;

/// Cancellation token of the running session
static SESSION_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

/// Setup the global Ctrl+C handler. Call once at program start
///
/// - Before `register_session()`: exits immediately, nothing to tear down
/// - After `register_session()`: cancels the session token, the session
///   disposes its clients and watchers and returns
/// - Pressed again during teardown: exits immediately
pub fn setup_shutdown_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        match SESSION_TOKEN.get() {
            // Second Ctrl+C while tearing down
            Some(token) if token.is_cancelled() => std::process::exit(130),
            Some(token) => {
                crate::log!("watch"; "shutting down...");
                token.cancel();
            }
            None => std::process::exit(0),
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))
}

/// Register the session token for graceful shutdown
pub fn register_session(token: CancellationToken) {
    let _ = SESSION_TOKEN.set(token);
}
