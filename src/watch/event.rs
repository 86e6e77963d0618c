//! Raw notify events -> [`ChangedPath`].
//!
//! Native and polling backends report the same change differently
//! (polling sees an mtime bump as a metadata write), both end up here.

use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{Event, EventKind};

use crate::core::{ChangeKind, ChangedPath};

/// Translate one notify event into per-path changes.
///
/// Access events and metadata-only changes other than write time are
/// dropped (chmod/atime noise).
pub fn changes_from_event(event: &Event) -> Vec<ChangedPath> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Add,
        EventKind::Remove(_) => ChangeKind::Delete,
        EventKind::Modify(ModifyKind::Name(mode)) => return renames(mode, &event.paths),
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)) => ChangeKind::Update,
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(_) => ChangeKind::Update,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        .map(|path| ChangedPath::new(path.clone(), kind))
        .collect()
}

fn renames(mode: RenameMode, paths: &[std::path::PathBuf]) -> Vec<ChangedPath> {
    match (mode, paths) {
        (RenameMode::Both, [from, to, ..]) => vec![
            ChangedPath::new(from.clone(), ChangeKind::RenameOld),
            ChangedPath::new(to.clone(), ChangeKind::RenameNew),
        ],
        (RenameMode::From, _) => paths
            .iter()
            .map(|p| ChangedPath::new(p.clone(), ChangeKind::RenameOld))
            .collect(),
        (RenameMode::To, _) => paths
            .iter()
            .map(|p| ChangedPath::new(p.clone(), ChangeKind::RenameNew))
            .collect(),
        // Backend could not tell which side this is: ask the filesystem
        _ => paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    ChangeKind::RenameNew
                } else {
                    ChangeKind::RenameOld
                };
                ChangedPath::new(p.clone(), kind)
            })
            .collect(),
    }
}
