//! RowSet directory for TabletDB tablets.
//!
//! A tablet's data lives in row sets: immutable on-disk sets with fixed key
//! bounds plus the single mutable in-memory set receiving inserts. This
//! crate maintains the catalogue of those row sets and the machinery that
//! replaces it atomically during flush and compaction:
//!
//! - [`IntervalTree`] - generic static interval index over ordered keys
//! - [`RowSet`]/[`RowSetTree`] - the immutable snapshot of a tablet's row
//!   sets with point and range lookup
//! - [`Tablet`] - the swap surface: a component lock under which the
//!   current [`RowSetTree`] is replaced wholesale and an MVCC snapshot is
//!   captured consistently

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod interval_tree;
pub mod mvcc;
pub mod rowset;
pub mod rowset_tree;
pub mod tablet;

pub use interval_tree::{Interval, IntervalTree};
pub use mvcc::{MvccManager, MvccSnapshot, Timestamp};
pub use rowset::{RowSet, RowSetBounds};
pub use rowset_tree::RowSetTree;
pub use tablet::Tablet;

use snafu::Snafu;

/// Result type alias for tablet operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur in the rowset directory.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The row set cannot report bounds because they change as data lands
    /// (the mutable in-memory row set). Recovered locally by treating the
    /// row set as relevant to every query.
    #[snafu(display("Row set bounds not supported"))]
    BoundsNotSupported,

    /// A row set failed to report its bounds.
    #[snafu(display("Unable to determine bounds for row set {name}: {source}"))]
    Bounds {
        /// Diagnostic name of the row set.
        name: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
