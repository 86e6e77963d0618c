//! Command-line interface module.

mod args;
pub mod topology;
pub mod watch;

pub use args::{Cli, Commands};
