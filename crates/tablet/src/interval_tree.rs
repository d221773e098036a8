//! Generic static interval index.
//!
//! An [`IntervalTree`] indexes a fixed set of closed intervals over any
//! totally-ordered point domain and answers two queries in O(log n + k):
//! which intervals contain a point, and which intervals intersect a query
//! interval. There is no insert or delete; callers rebuild the tree when
//! the interval set changes.
//!
//! Each node picks the median endpoint of its input as the center.
//! Intervals containing the center stay at the node, stored twice: once
//! ascending by left endpoint (for probes left of center) and once
//! descending by right endpoint (for probes right of center). Intervals
//! strictly left or right of the center recurse into the subtrees.
//! Intervals whose endpoint equals the center stay at the node.

/// A closed interval over an ordered point domain.
///
/// The seam the tree is generic over: anything that can report its left and
/// right endpoints can be indexed, keeping byte-slice specifics out of the
/// tree itself.
pub trait Interval {
    /// The ordered point domain.
    type Point: Ord + Clone;

    /// Left (inclusive) endpoint.
    fn left(&self) -> &Self::Point;

    /// Right (inclusive) endpoint.
    fn right(&self) -> &Self::Point;
}

/// Static interval tree over a set of closed intervals.
pub struct IntervalTree<I: Interval + Clone> {
    root: Option<Box<Node<I>>>,
    len: usize,
}

struct Node<I: Interval + Clone> {
    center: I::Point,
    /// Intervals containing `center`, ascending by left endpoint.
    by_asc_left: Vec<I>,
    /// The same intervals, descending by right endpoint.
    by_desc_right: Vec<I>,
    left: Option<Box<Node<I>>>,
    right: Option<Box<Node<I>>>,
}

impl<I: Interval + Clone> IntervalTree<I> {
    /// Builds a tree over `intervals`.
    pub fn new(intervals: Vec<I>) -> Self {
        let len = intervals.len();
        Self { root: Node::build(intervals), len }
    }

    /// Number of indexed intervals.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the tree indexes no intervals.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends to `out` every interval `i` with
    /// `i.left() <= point <= i.right()`.
    pub fn find_containing_point(&self, point: &I::Point, out: &mut Vec<I>) {
        if let Some(root) = &self.root {
            root.find_containing_point(point, out);
        }
    }

    /// Appends to `out` every interval intersecting the closed query
    /// interval `[lower, upper]`.
    pub fn find_intersecting_interval(&self, lower: &I::Point, upper: &I::Point, out: &mut Vec<I>) {
        debug_assert!(lower <= upper, "query interval is inverted");
        if let Some(root) = &self.root {
            root.find_intersecting_interval(lower, upper, out);
        }
    }
}

impl<I: Interval + Clone> Node<I> {
    fn build(intervals: Vec<I>) -> Option<Box<Self>> {
        if intervals.is_empty() {
            return None;
        }

        let mut endpoints: Vec<I::Point> = Vec::with_capacity(intervals.len() * 2);
        for interval in &intervals {
            endpoints.push(interval.left().clone());
            endpoints.push(interval.right().clone());
        }
        endpoints.sort();
        let center = endpoints[endpoints.len() / 2].clone();

        let mut to_left = Vec::new();
        let mut overlapping = Vec::new();
        let mut to_right = Vec::new();
        for interval in intervals {
            if *interval.right() < center {
                to_left.push(interval);
            } else if *interval.left() > center {
                to_right.push(interval);
            } else {
                overlapping.push(interval);
            }
        }
        // The interval contributing the median endpoint always contains the
        // center, so `overlapping` is non-empty and recursion terminates.
        debug_assert!(!overlapping.is_empty());

        let mut by_asc_left = overlapping.clone();
        by_asc_left.sort_by(|a, b| a.left().cmp(b.left()));
        let mut by_desc_right = overlapping;
        by_desc_right.sort_by(|a, b| b.right().cmp(a.right()));

        Some(Box::new(Self {
            center,
            by_asc_left,
            by_desc_right,
            left: Self::build(to_left),
            right: Self::build(to_right),
        }))
    }

    fn find_containing_point(&self, point: &I::Point, out: &mut Vec<I>) {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match point.cmp(&self.center) {
            Less => {
                // Node intervals all reach the center, so they contain the
                // probe iff they start at or before it.
                for interval in &self.by_asc_left {
                    if interval.left() > point {
                        break;
                    }
                    out.push(interval.clone());
                }
                if let Some(left) = &self.left {
                    left.find_containing_point(point, out);
                }
            }
            Equal => {
                out.extend(self.by_asc_left.iter().cloned());
            }
            Greater => {
                for interval in &self.by_desc_right {
                    if interval.right() < point {
                        break;
                    }
                    out.push(interval.clone());
                }
                if let Some(right) = &self.right {
                    right.find_containing_point(point, out);
                }
            }
        }
    }

    fn find_intersecting_interval(&self, lower: &I::Point, upper: &I::Point, out: &mut Vec<I>) {
        if upper < &self.center {
            // Node intervals reach the center past `upper`; they intersect
            // iff they start at or before `upper`. The right subtree lies
            // entirely past the center and cannot intersect.
            for interval in &self.by_asc_left {
                if interval.left() > upper {
                    break;
                }
                out.push(interval.clone());
            }
            if let Some(left) = &self.left {
                left.find_intersecting_interval(lower, upper, out);
            }
        } else if lower > &self.center {
            for interval in &self.by_desc_right {
                if interval.right() < lower {
                    break;
                }
                out.push(interval.clone());
            }
            if let Some(right) = &self.right {
                right.find_intersecting_interval(lower, upper, out);
            }
        } else {
            // The query spans the center: every node interval intersects,
            // and both subtrees may hold more.
            out.extend(self.by_asc_left.iter().cloned());
            if let Some(left) = &self.left {
                left.find_intersecting_interval(lower, upper, out);
            }
            if let Some(right) = &self.right {
                right.find_intersecting_interval(lower, upper, out);
            }
        }
    }
}
