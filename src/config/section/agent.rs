//! `[agent]` section configuration.
//!
//! ```toml
//! [agent]
//! pipe_name = "myapp-reload"   # Default: deltawatch-<random>
//! connect_timeout_ms = 30000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigDiagnostics;

/// In-process agent endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Socket/pipe name handed to the launched process.
    pub pipe_name: Option<String>,

    /// How long the session waits for a client to connect.
    pub connect_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            pipe_name: None,
            connect_timeout_ms: 30_000,
        }
    }
}

impl AgentConfig {
    /// Configured pipe name, or a fresh random one.
    pub fn pipe_name(&self) -> String {
        self.pipe_name
            .clone()
            .unwrap_or_else(|| format!("deltawatch-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.connect_timeout_ms == 0 {
            diag.error("agent.connect_timeout_ms", "must be greater than 0");
        }

        if let Some(name) = &self.pipe_name {
            if name.is_empty() {
                diag.error("agent.pipe_name", "must not be empty");
            } else if name.contains(['/', '\\']) {
                diag.error_with_hint(
                    "agent.pipe_name",
                    format!("`{name}` contains a path separator"),
                    "use a plain name, the endpoint location is chosen per platform",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_agent_config() {
        let config =
            test_parse_config("[agent]\npipe_name = \"app-reload\"\nconnect_timeout_ms = 500");

        assert_eq!(config.agent.pipe_name(), "app-reload");
        assert_eq!(config.agent.connect_timeout().as_millis(), 500);
    }

    #[test]
    fn test_generated_pipe_name() {
        let config = test_parse_config("");

        let name = config.agent.pipe_name();
        assert!(name.starts_with("deltawatch-"));
        assert_ne!(name, config.agent.pipe_name());
        assert_eq!(config.agent.connect_timeout_ms, 30_000);
    }
}
