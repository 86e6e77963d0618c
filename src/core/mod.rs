//! Core types - plain values shared by the watcher, the clients and the session.

mod change;
mod state;
mod status;
mod update;

pub use change::{ChangeKind, ChangedPath};
pub use state::{register_session, setup_shutdown_handler};
pub use status::{ApplyStatus, TargetOutcome, aggregate};
pub use update::{ManagedCodeUpdate, StaticAssetUpdate, UpdateBatch};
pub(crate) use update::blob;
