//! Configuration section definitions.
//!
//! Each submodule corresponds to a section in `deltawatch.toml`.

mod agent;
mod browser;
mod session;
mod watch;

pub use agent::AgentConfig;
pub use browser::BrowserConfig;
pub use session::SessionConfig;
pub use watch::WatchConfig;
