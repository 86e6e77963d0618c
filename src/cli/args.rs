//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Watch a project and apply code and asset deltas to the running app
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: deltawatch.toml, searched upward)
    #[arg(short = 'C', long, global = true, default_value = "deltawatch.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Enable verbose output for debugging (`-V` is `--version`)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a hot reload session for the entry project of a project graph
    #[command(visible_alias = "w")]
    Watch {
        /// Project graph file (JSON)
        #[arg(value_hint = clap::ValueHint::FilePath)]
        graph: PathBuf,

        /// Force polling instead of native file notifications
        #[arg(short = 'p', long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        polling: Option<bool>,

        /// Browser refresh server port (0 = ephemeral)
        #[arg(short = 'P', long)]
        port: Option<u16>,
    },

    /// Print the inferred app model and its clients
    #[command(visible_alias = "t")]
    Topology {
        /// Project graph file (JSON)
        #[arg(value_hint = clap::ValueHint::FilePath)]
        graph: PathBuf,
    },
}

impl Cli {
    pub fn graph(&self) -> &PathBuf {
        match &self.command {
            Commands::Watch { graph, .. } | Commands::Topology { graph } => graph,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_overrides() {
        let cli = Cli::try_parse_from(["deltawatch", "watch", "graph.json", "--polling", "-P", "9000", "-v"])
            .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.graph(), &PathBuf::from("graph.json"));
        match cli.command {
            Commands::Watch { polling, port, .. } => {
                assert_eq!(polling, Some(true));
                assert_eq!(port, Some(9000));
            }
            Commands::Topology { .. } => panic!("expected watch"),
        }
    }

    #[test]
    fn test_parse_topology_defaults() {
        let cli = Cli::try_parse_from(["deltawatch", "topology", "app/graph.json"]).unwrap();

        assert!(!cli.verbose);
        assert_eq!(cli.config, PathBuf::from("deltawatch.toml"));
        assert_eq!(cli.graph(), &PathBuf::from("app/graph.json"));
    }

    #[test]
    fn test_version_and_verbose_flags_coexist() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let err = Cli::try_parse_from(["deltawatch", "-V"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);

        let cli = Cli::try_parse_from(["deltawatch", "topology", "g.json", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_graph_required() {
        assert!(Cli::try_parse_from(["deltawatch", "watch"]).is_err());
    }
}
