//! Minimal MVCC collaborator for the swap surface.
//!
//! The full transaction engine lives outside this crate; the rowset
//! directory only needs a monotonic logical clock and a way to capture
//! "everything committed so far" atomically with a rowset swap, so a
//! reader's tree and its snapshot agree on which row sets contain which
//! versions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Logical commit timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

/// Monotonic logical clock issuing commit timestamps.
#[derive(Debug, Default)]
pub struct MvccManager {
    next: AtomicU64,
}

impl MvccManager {
    /// Creates a clock starting at timestamp 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next commit timestamp.
    pub fn assign_timestamp(&self) -> Timestamp {
        Timestamp(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Captures a snapshot covering every timestamp issued so far.
    pub fn take_snapshot(&self) -> MvccSnapshot {
        MvccSnapshot { all_committed_before: Timestamp(self.next.load(Ordering::SeqCst)) }
    }
}

/// Point-in-time view of the commit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MvccSnapshot {
    all_committed_before: Timestamp,
}

impl MvccSnapshot {
    /// Returns true if a write at `timestamp` is visible in this snapshot.
    pub fn is_committed(&self, timestamp: Timestamp) -> bool {
        timestamp < self.all_committed_before
    }

    /// Exclusive upper bound of the committed timestamps in this snapshot.
    pub fn all_committed_before(&self) -> Timestamp {
        self.all_committed_before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_are_monotonic() {
        let mvcc = MvccManager::new();
        let a = mvcc.assign_timestamp();
        let b = mvcc.assign_timestamp();
        assert!(a < b);
    }

    #[test]
    fn test_snapshot_covers_prior_commits_only() {
        let mvcc = MvccManager::new();
        let before = mvcc.assign_timestamp();
        let snap = mvcc.take_snapshot();
        let after = mvcc.assign_timestamp();

        assert!(snap.is_committed(before));
        assert!(!snap.is_committed(after));
    }

    #[test]
    fn test_snapshot_is_stable() {
        let mvcc = MvccManager::new();
        let snap = mvcc.take_snapshot();
        let bound = snap.all_committed_before();
        mvcc.assign_timestamp();
        assert_eq!(snap.all_committed_before(), bound);
    }
}
