//! `[browser]` section configuration.
//!
//! ```toml
//! [browser]
//! enable = true             # Start the browser refresh server
//! interface = "127.0.0.1"   # Use 0.0.0.0 to accept tabs from the LAN
//! port = 0                  # 0 = ephemeral; busy ports are retried upward
//! ```

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Browser refresh server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enable: bool,
    pub interface: IpAddr,
    pub port: u16,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enable: true,
            interface: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 0,
        }
    }
}
