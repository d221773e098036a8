//! Immutable snapshot of a tablet's row sets with efficient key lookup.
//!
//! A [`RowSetTree`] answers "which row sets might contain this key (or
//! overlap this range)?" Row sets with fixed bounds are indexed in an
//! interval tree. Row sets whose bounds drift (the mutable in-memory set)
//! cannot be indexed with a bounds snapshot, since it would go stale as
//! inserts land; they are kept on a side list that every query consults
//! unconditionally. Correctness outweighs the constant
//! cost: there is at most one such row set per tablet in normal operation.
//!
//! Once initialized the tree is immutable. Flush and compaction build a
//! replacement and swap it in via [`Tablet`](crate::Tablet).

use std::sync::Arc;

use tracing::warn;

use crate::{
    interval_tree::{Interval, IntervalTree},
    rowset::RowSet,
    Error, Result,
};

/// A bounded row set with its snapshot-time bounds, as stored in the
/// interval tree.
struct RowSetWithBounds {
    rowset: Arc<dyn RowSet>,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
}

impl Interval for Arc<RowSetWithBounds> {
    type Point = Vec<u8>;

    fn left(&self) -> &Vec<u8> {
        &self.min_key
    }

    fn right(&self) -> &Vec<u8> {
        &self.max_key
    }
}

/// Snapshot of a tablet's row sets supporting point and range lookup.
pub struct RowSetTree {
    initted: bool,
    /// Bounded row sets with owned copies of their bounds.
    entries: Vec<Arc<RowSetWithBounds>>,
    /// Row sets whose bounds are unknown; consulted on every query.
    unbounded_rowsets: Vec<Arc<dyn RowSet>>,
    tree: IntervalTree<Arc<RowSetWithBounds>>,
    /// Every row set in the snapshot, pinning lifetimes for readers.
    all_rowsets: Vec<Arc<dyn RowSet>>,
}

impl Default for RowSetTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RowSetTree {
    /// Creates an uninitialized tree. Call [`reset`](Self::reset) exactly
    /// once before querying.
    pub fn new() -> Self {
        Self {
            initted: false,
            entries: Vec::new(),
            unbounded_rowsets: Vec::new(),
            tree: IntervalTree::new(Vec::new()),
            all_rowsets: Vec::new(),
        }
    }

    /// Initializes the tree from a snapshot of row sets.
    ///
    /// Row sets that cannot report bounds go to the unbounded list; any
    /// other bounds failure aborts the reset, leaving the tree
    /// uninitialized and nothing allocated.
    ///
    /// # Errors
    ///
    /// Propagates the first non-`BoundsNotSupported` error from a row set's
    /// bounds retrieval.
    ///
    /// # Panics
    ///
    /// Panics if the tree was already initialized; any change to the row
    /// set collection requires building a new `RowSetTree`.
    pub fn reset(&mut self, rowsets: Vec<Arc<dyn RowSet>>) -> Result<()> {
        assert!(!self.initted, "RowSetTree already initialized");

        let mut entries = Vec::with_capacity(rowsets.len());
        let mut unbounded = Vec::new();
        for rowset in &rowsets {
            match rowset.bounds() {
                Ok(bounds) => entries.push(Arc::new(RowSetWithBounds {
                    rowset: Arc::clone(rowset),
                    min_key: bounds.min_key,
                    max_key: bounds.max_key,
                })),
                Err(Error::BoundsNotSupported) => unbounded.push(Arc::clone(rowset)),
                Err(e) => {
                    warn!(
                        rowset = %rowset.name(),
                        error = %e,
                        "Unable to construct RowSetTree: row set bounds unavailable"
                    );
                    return Err(e);
                }
            }
        }

        self.tree = IntervalTree::new(entries.clone());
        self.entries = entries;
        self.unbounded_rowsets = unbounded;
        self.all_rowsets = rowsets;
        self.initted = true;
        Ok(())
    }

    /// Every row set in this snapshot.
    pub fn all_rowsets(&self) -> &[Arc<dyn RowSet>] {
        &self.all_rowsets
    }

    /// Appends to `out` every row set that may contain a key in the closed
    /// range `[lower_bound, upper_bound]`.
    ///
    /// # Panics
    ///
    /// Panics if the tree was never initialized.
    pub fn find_rowsets_intersecting_interval(
        &self,
        lower_bound: &[u8],
        upper_bound: &[u8],
        out: &mut Vec<Arc<dyn RowSet>>,
    ) {
        assert!(self.initted, "RowSetTree not initialized");

        // Row sets with unknown bounds always need to be checked.
        out.extend(self.unbounded_rowsets.iter().cloned());

        // TODO: query with borrowed keys instead of copying into owned
        // points for every call.
        let mut from_tree = Vec::with_capacity(self.entries.len());
        self.tree.find_intersecting_interval(
            &lower_bound.to_vec(),
            &upper_bound.to_vec(),
            &mut from_tree,
        );
        out.extend(from_tree.into_iter().map(|e| Arc::clone(&e.rowset)));
    }

    /// Appends to `out` every row set that may contain `encoded_key`.
    ///
    /// # Panics
    ///
    /// Panics if the tree was never initialized.
    pub fn find_rowsets_with_key_in_range(
        &self,
        encoded_key: &[u8],
        out: &mut Vec<Arc<dyn RowSet>>,
    ) {
        assert!(self.initted, "RowSetTree not initialized");

        // Row sets with unknown bounds always need to be checked.
        out.extend(self.unbounded_rowsets.iter().cloned());

        let mut from_tree = Vec::with_capacity(self.entries.len());
        self.tree.find_containing_point(&encoded_key.to_vec(), &mut from_tree);
        out.extend(from_tree.into_iter().map(|e| Arc::clone(&e.rowset)));
    }
}
