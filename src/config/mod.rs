//! Session configuration from `deltawatch.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! │   ├── agent      # [agent]
//! │   ├── browser    # [browser]
//! │   ├── session    # [session]
//! │   └── watch      # [watch]
//! ├── types/         # Utility types
//! │   └── error      # ConfigError, ConfigDiagnostics
//! └── mod.rs         # DeltaConfig (this file)
//! ```
//!
//! The config file is optional: without one every section uses its
//! defaults. CLI flags override file values.

pub mod section;
pub mod types;
mod util;

use util::find_config_file;

pub use section::{AgentConfig, BrowserConfig, SessionConfig, WatchConfig};
pub use types::{ConfigDiagnostics, ConfigError};

use crate::{
    cli::{Cli, Commands},
    debug, log,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing deltawatch.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaConfig {
    /// Absolute path to the config file, empty when none was found
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Directory relative paths in the config resolve against
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

impl DeltaConfig {
    /// Load configuration for a CLI invocation.
    ///
    /// Searches upward from cwd; the root is the config file's parent, or
    /// cwd when no file exists.
    pub fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current working directory")?;

        let mut config = match find_config_file(&cli.config) {
            Some(path) => {
                let mut config = Self::from_path(&path)?;
                config.root = path.parent().map_or_else(|| cwd.clone(), Path::to_path_buf);
                config.config_path = path;
                config
            }
            None => {
                debug!("config"; "no {} found, using defaults", cli.config.display());
                Self {
                    root: cwd,
                    ..Self::default()
                }
            }
        };

        config.normalize_paths();
        config.apply_command_options(cli);
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }

        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })
        .map_err(ConfigError::Toml)?;
        Ok((config, ignored))
    }

    /// Unknown fields never stop a session, they are reported and skipped.
    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring: {}", display_path, fields.join(", "));
    }

    // ========================================================================
    // cli configuration updates
    // ========================================================================

    fn apply_command_options(&mut self, cli: &Cli) {
        crate::logger::set_verbose(cli.verbose);

        match &cli.command {
            Commands::Watch { polling, port, .. } => {
                Self::update_option(&mut self.watch.use_polling, polling.as_ref());
                Self::update_option(&mut self.browser.port, port.as_ref());
            }
            Commands::Topology { .. } => {}
        }
    }

    /// Update config option if CLI value is provided.
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    // ========================================================================
    // path normalization
    // ========================================================================

    fn normalize_paths(&mut self) {
        use crate::utils::path::{normalize_path, resolve_path};

        self.root = normalize_path(&self.root);
        if !self.config_path.as_os_str().is_empty() {
            self.config_path = normalize_path(&self.config_path);
        }
        if let Some(dir) = self.session.updates_dir.take() {
            self.session.updates_dir = Some(resolve_path(&dir, &self.root));
        }
    }

    // ========================================================================
    // validation
    // ========================================================================

    /// Collects errors from every section and returns them at once.
    pub fn validate(&self) -> Result<()> {
        let mut diag = ConfigDiagnostics::new();

        self.watch.validate(&mut diag);
        self.agent.validate(&mut diag);
        self.session.validate(&mut diag);

        diag.into_result()
            .map_err(|e| ConfigError::Diagnostics(e).into())
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse config, panicking on unknown fields (to catch typos in tests).
#[cfg(test)]
pub fn test_parse_config(content: &str) -> DeltaConfig {
    let (parsed, ignored) = DeltaConfig::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

// ============================================================================
// tests
// ============================================================================
