//! Path layout for consensus metadata.
//!
//! All consensus metadata for a node lives under one directory:
//! `<root>/consensus-meta/<tablet_id>`, one record file per tablet.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::env::Env;

/// Name of the directory holding per-tablet consensus metadata files.
pub const CONSENSUS_METADATA_DIR: &str = "consensus-meta";

/// Owns the storage root, the filesystem collaborator, and the volume
/// properties that feed the fsync policy.
#[derive(Debug)]
pub struct FsManager<E: Env> {
    env: Arc<E>,
    root: PathBuf,
    meta_on_xfs: bool,
}

impl<E: Env> FsManager<E> {
    /// Creates a manager rooted at `root`.
    ///
    /// `meta_on_xfs` records whether the metadata volume is XFS; the flush
    /// fsync policy consults it (see `DurabilityConfig::should_fsync`).
    pub fn new(env: Arc<E>, root: impl Into<PathBuf>, meta_on_xfs: bool) -> Self {
        Self { env, root: root.into(), meta_on_xfs }
    }

    /// Returns the filesystem collaborator.
    pub fn env(&self) -> &Arc<E> {
        &self.env
    }

    /// Returns the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true if the metadata volume is XFS.
    pub fn meta_on_xfs(&self) -> bool {
        self.meta_on_xfs
    }

    /// Directory holding all consensus metadata files for this node.
    pub fn consensus_metadata_dir(&self) -> PathBuf {
        self.root.join(CONSENSUS_METADATA_DIR)
    }

    /// Path of the consensus metadata file for `tablet_id`.
    pub fn consensus_metadata_path(&self, tablet_id: &str) -> PathBuf {
        self.consensus_metadata_dir().join(tablet_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::env::DiskEnv;

    #[test]
    fn test_path_layout() {
        let fs = FsManager::new(Arc::new(DiskEnv), "/data/node-0", false);
        assert_eq!(fs.consensus_metadata_dir(), PathBuf::from("/data/node-0/consensus-meta"));
        assert_eq!(
            fs.consensus_metadata_path("tablet-7"),
            PathBuf::from("/data/node-0/consensus-meta/tablet-7")
        );
        assert!(!fs.meta_on_xfs());
    }
}
