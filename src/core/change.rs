use std::fmt;
use std::path::{Path, PathBuf};

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
    /// Old name of a renamed file (the path no longer exists).
    RenameOld,
    /// New name of a renamed file.
    RenameNew,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Add => "added",
            Self::Update => "updated",
            Self::Delete => "deleted",
            Self::RenameOld => "renamed from",
            Self::RenameNew => "renamed to",
        }
    }

    /// True if the path is gone after this change.
    pub fn is_removal(self) -> bool {
        matches!(self, Self::Delete | Self::RenameOld)
    }

    /// True if the path (re)appeared with this change.
    pub fn is_appearance(self) -> bool {
        matches!(self, Self::Add | Self::RenameNew)
    }
}

/// A single file change delivered by the watcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangedPath {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangedPath {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Directory containing the changed path.
    pub fn directory(&self) -> Option<&Path> {
        self.path.parent()
    }
}

impl fmt::Display for ChangedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.label(), self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_and_appearance() {
        assert!(ChangeKind::Delete.is_removal());
        assert!(ChangeKind::RenameOld.is_removal());
        assert!(!ChangeKind::Update.is_removal());

        assert!(ChangeKind::Add.is_appearance());
        assert!(ChangeKind::RenameNew.is_appearance());
        assert!(!ChangeKind::Delete.is_appearance());
    }

    #[test]
    fn test_display() {
        let change = ChangedPath::new("/p/a.cs", ChangeKind::Update);
        assert_eq!(change.to_string(), "updated /p/a.cs");
        assert_eq!(change.directory(), Some(Path::new("/p")));
    }
}
