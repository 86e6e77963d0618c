//! Apply outcome aggregation.
//!
//! A logical client may fan an update out to several physical targets
//! (browser tabs). Each target yields one [`TargetOutcome`]; [`aggregate`]
//! folds them into the single [`ApplyStatus`] reported for the call.

use std::fmt;

/// Overall result of one apply call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyStatus {
    Failed,
    AllChangesApplied,
    SomeChangesApplied,
    NoChangesApplied,
}

impl ApplyStatus {
    /// Status assumed without confirmation (suspended target, no targets).
    pub fn optimistic(fully_applicable: bool) -> Self {
        if fully_applicable {
            Self::AllChangesApplied
        } else {
            Self::SomeChangesApplied
        }
    }

    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }

    /// Combine the statuses of several clients for one batch.
    ///
    /// Any failure wins; otherwise the weakest success is reported.
    pub fn merge(self, other: Self) -> Self {
        use ApplyStatus::*;
        match (self, other) {
            (Failed, _) | (_, Failed) => Failed,
            (SomeChangesApplied, _) | (_, SomeChangesApplied) => SomeChangesApplied,
            (NoChangesApplied, x) | (x, NoChangesApplied) => x,
            (AllChangesApplied, AllChangesApplied) => AllChangesApplied,
        }
    }
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Failed => "failed",
            Self::AllChangesApplied => "all changes applied",
            Self::SomeChangesApplied => "some changes applied",
            Self::NoChangesApplied => "no changes applied",
        };
        f.write_str(s)
    }
}

/// What a single physical target reported for one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Succeeded,
    /// Response carried `Success: false`.
    Rejected,
    /// Response could not be decoded.
    ProtocolMismatch,
    /// Target went away before answering.
    Disconnected,
}

impl TargetOutcome {
    fn is_failure(self) -> bool {
        matches!(self, Self::Rejected | Self::ProtocolMismatch)
    }
}

/// Fold per-target outcomes into one status.
///
/// - at least one success: all/some depending on `fully_applicable`
/// - no success, at least one explicit failure: `Failed`
/// - nobody answered (no targets, or all disconnected): `AllChangesApplied`
pub fn aggregate(outcomes: &[TargetOutcome], fully_applicable: bool) -> ApplyStatus {
    let successes = outcomes
        .iter()
        .filter(|o| **o == TargetOutcome::Succeeded)
        .count();
    let failures = outcomes.iter().filter(|o| o.is_failure()).count();

    if successes > 0 {
        ApplyStatus::optimistic(fully_applicable)
    } else if failures > 0 {
        ApplyStatus::Failed
    } else {
        ApplyStatus::AllChangesApplied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TargetOutcome::*;

    #[test]
    fn test_partial_failure_is_not_failed() {
        assert_eq!(
            aggregate(&[Succeeded, Succeeded, Rejected], true),
            ApplyStatus::AllChangesApplied
        );
        assert_eq!(
            aggregate(&[Succeeded, ProtocolMismatch], false),
            ApplyStatus::SomeChangesApplied
        );
    }

    #[test]
    fn test_all_failures() {
        assert_eq!(aggregate(&[Rejected, Rejected], true), ApplyStatus::Failed);
        assert_eq!(
            aggregate(&[ProtocolMismatch, Disconnected], true),
            ApplyStatus::Failed
        );
    }

    #[test]
    fn test_no_targets_assumes_applied() {
        assert_eq!(aggregate(&[], true), ApplyStatus::AllChangesApplied);
        assert_eq!(aggregate(&[], false), ApplyStatus::AllChangesApplied);
        assert_eq!(
            aggregate(&[Disconnected, Disconnected], true),
            ApplyStatus::AllChangesApplied
        );
    }

    #[test]
    fn test_merge() {
        use ApplyStatus::*;
        assert_eq!(AllChangesApplied.merge(Failed), Failed);
        assert_eq!(AllChangesApplied.merge(SomeChangesApplied), SomeChangesApplied);
        assert_eq!(NoChangesApplied.merge(AllChangesApplied), AllChangesApplied);
        assert_eq!(NoChangesApplied.merge(NoChangesApplied), NoChangesApplied);
    }
}
