//! The row set seam of the tablet layer.
//!
//! Row sets themselves (encoding, iteration, compaction inputs) live
//! elsewhere; the directory only needs two things from them: key bounds and
//! a diagnostic name. Mutable in-memory row sets grow as inserts land and
//! cannot report stable bounds; they signal
//! [`Error::BoundsNotSupported`](crate::Error::BoundsNotSupported) and the
//! directory treats them as relevant to every query.

use std::fmt;

use crate::Result;

/// Snapshot-time key bounds of a row set, both ends inclusive.
///
/// The bounds are owned copies: they must outlive the interval tree built
/// over them and may not alias row-set-internal memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSetBounds {
    /// Smallest encoded key in the row set.
    pub min_key: Vec<u8>,
    /// Largest encoded key in the row set.
    pub max_key: Vec<u8>,
}

impl RowSetBounds {
    /// Creates bounds from owned keys.
    pub fn new(min_key: impl Into<Vec<u8>>, max_key: impl Into<Vec<u8>>) -> Self {
        Self { min_key: min_key.into(), max_key: max_key.into() }
    }
}

/// A row set as seen by the directory.
///
/// Implementations are shared between the tablet and every snapshot that
/// references them, hence `Send + Sync`.
pub trait RowSet: Send + Sync + fmt::Debug {
    /// Reports the row set's current key bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BoundsNotSupported`](crate::Error::BoundsNotSupported)
    /// for mutable in-memory row sets whose bounds drift, and
    /// [`Error::Bounds`](crate::Error::Bounds) if bounds retrieval fails.
    fn bounds(&self) -> Result<RowSetBounds>;

    /// Diagnostic name for logs and error messages.
    fn name(&self) -> String;
}
