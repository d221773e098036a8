//! The tablet swap surface.
//!
//! A [`Tablet`] owns the current [`RowSetTree`] behind a component lock:
//!
//! - Readers take the lock in shared mode, copy the shared reference to the
//!   tree, capture an MVCC snapshot, and release before scanning. The tree
//!   they hold stays alive through the reference even after a swap.
//! - Flush and compaction take the lock in exclusive mode (draining
//!   readers), build the replacement tree, install it, and capture the
//!   snapshot before releasing, so a reader's tree and its snapshot always
//!   agree on which row sets contain which versions.
//!
//! Callers should not hold the lock for long even in shared mode: the lock
//! is fair, so a long reader followed by one writer blocks all subsequent
//! short readers.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    mvcc::{MvccManager, MvccSnapshot},
    rowset::RowSet,
    rowset_tree::RowSetTree,
    Result,
};

/// A tablet's swappable components: the rowset directory plus the MVCC
/// clock whose snapshots must be captured consistently with it.
pub struct Tablet {
    /// Component lock: protects the identity of the current rowset
    /// collection against concurrent swap.
    components: RwLock<Arc<RowSetTree>>,
    mvcc: MvccManager,
}

impl Tablet {
    /// Opens a tablet over an initial snapshot of row sets.
    ///
    /// # Errors
    ///
    /// Propagates `RowSetTree` initialization failures.
    pub fn open(rowsets: Vec<Arc<dyn RowSet>>) -> Result<Self> {
        let mut tree = RowSetTree::new();
        tree.reset(rowsets)?;
        Ok(Self { components: RwLock::new(Arc::new(tree)), mvcc: MvccManager::new() })
    }

    /// Opens an empty tablet.
    ///
    /// # Errors
    ///
    /// Never fails in practice; kept fallible for parity with
    /// [`open`](Self::open).
    pub fn new() -> Result<Self> {
        Self::open(Vec::new())
    }

    /// The MVCC clock for this tablet.
    pub fn mvcc_manager(&self) -> &MvccManager {
        &self.mvcc
    }

    /// Returns the current rowset tree.
    pub fn rowset_tree(&self) -> Arc<RowSetTree> {
        Arc::clone(&self.components.read())
    }

    /// Reader entry point: captures the current tree and an MVCC snapshot
    /// that agree with each other, holding the component lock in shared
    /// mode only for the capture.
    pub fn capture_components(&self) -> (Arc<RowSetTree>, MvccSnapshot) {
        let components = self.components.read();
        let tree = Arc::clone(&components);
        let snapshot = self.mvcc.take_snapshot();
        (tree, snapshot)
    }

    /// Atomically replaces `to_remove` with `to_add` in the rowset
    /// collection, returning the MVCC snapshot captured under the lock.
    ///
    /// Row sets are matched by identity (`Arc::ptr_eq`); `to_remove`
    /// entries not present in the current collection are ignored. Readers
    /// never observe a partially-built tree: the replacement is fully
    /// constructed before it is installed, and the old tree stays alive for
    /// readers still holding it.
    ///
    /// # Errors
    ///
    /// Propagates `RowSetTree` initialization failures; the current tree is
    /// left in place.
    pub fn swap_rowsets(
        &self,
        to_remove: &[Arc<dyn RowSet>],
        to_add: &[Arc<dyn RowSet>],
    ) -> Result<MvccSnapshot> {
        let mut components = self.components.write();

        let mut new_set: Vec<Arc<dyn RowSet>> = components
            .all_rowsets()
            .iter()
            .filter(|rs| !to_remove.iter().any(|old| Arc::ptr_eq(old, rs)))
            .cloned()
            .collect();
        new_set.extend(to_add.iter().cloned());

        let mut tree = RowSetTree::new();
        tree.reset(new_set)?;
        *components = Arc::new(tree);

        // Capture while still holding the lock so the snapshot agrees with
        // the tree just installed.
        Ok(self.mvcc.take_snapshot())
    }
}
