//! # veb-tree
//!
//! An ordered set of integers drawn from a fixed universe `[0, 2^S)`, backed by a
//! van Emde Boas tree. Insert, remove, membership, successor and predecessor run in
//! `O(log S)`; min and max are `O(1)`.
//!
//! ## Example
//!
//! ```rust
//! use veb_tree::VebTree;
//!
//! let mut tree = VebTree::new(10)?;
//! for key in [3, 7, 10, 42] {
//!     tree.insert(key)?;
//! }
//!
//! assert_eq!(tree.successor(5), Some(7));
//! assert_eq!(tree.predecessor(5), Some(3));
//! assert_eq!(tree.min(), Some(3));
//! assert_eq!(tree.max(), Some(42));
//! # Ok::<(), veb_tree::VebError>(())
//! ```
//!
//! A tree is not synchronised. Insert and remove rewrite the summary/cluster graph in
//! several steps, so sharing one between threads needs a lock around the whole tree.

#![forbid(unsafe_code)]

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::iter::FusedIterator;
use std::ops::{Bound, RangeBounds};

use thiserror::Error;

mod tracing_helpers;

use tracing_helpers::{debug_log, trace_log};

// =============================================================================
// Configuration
// =============================================================================

/// Widest universe a `u64` key can address.
pub const MAX_UNIVERSE_BITS: u32 = 64;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum VebError {
    #[error("universe of {bits} bits is not supported (expected 1..=64)")]
    InvalidUniverse { bits: u32 },

    #[error("key {key} is outside the universe [0, 2^{bits})")]
    OutOfRange { key: u64, bits: u32 },
}

// =============================================================================
// Universe splitting
// =============================================================================

/// Bits addressing a key inside a cluster (`⌊bits/2⌋`).
#[inline]
fn low_bits(bits: u32) -> u32 {
    bits / 2
}

/// Bits addressing a cluster, i.e. the summary's universe (`⌈bits/2⌉`).
#[inline]
fn high_bits(bits: u32) -> u32 {
    bits - bits / 2
}

#[inline]
fn max_key_for(bits: u32) -> u64 {
    debug_assert!((1..=MAX_UNIVERSE_BITS).contains(&bits));
    u64::MAX >> (MAX_UNIVERSE_BITS - bits)
}

/// Walk order for neighbour queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// `a` comes strictly before `b` when walking in this direction.
    #[inline]
    fn precedes(self, a: u64, b: u64) -> bool {
        match self {
            Direction::Forward => a < b,
            Direction::Backward => a > b,
        }
    }

    /// `(near, far)` ends of `[min, max]` in this direction.
    #[inline]
    fn ends(self, min: u64, max: u64) -> (u64, u64) {
        match self {
            Direction::Forward => (min, max),
            Direction::Backward => (max, min),
        }
    }
}

// =============================================================================
// Recursive node
// =============================================================================

/// One level of the structure, covering keys `[0, 2^bits)`.
///
/// The smallest and largest keys live only in `extremes`; every other key is stored
/// in exactly one cluster. A cluster index is a member of `summary` iff that cluster
/// exists iff it is non-empty.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Node {
    bits: u32,
    /// Hoisted `(min, max)`. `None` iff the node is empty.
    extremes: Option<(u64, u64)>,
    /// Occupied cluster indices over the `high_bits` universe.
    summary: Option<Box<Node>>,
    /// Non-empty clusters over the `low_bits` universe.
    clusters: HashMap<u64, Node>,
}

impl Node {
    fn new(bits: u32) -> Self {
        debug_assert!(bits >= 1, "node universe must hold at least two keys");
        Self {
            bits,
            extremes: None,
            summary: None,
            clusters: HashMap::new(),
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.extremes.is_none()
    }

    #[inline]
    fn min(&self) -> Option<u64> {
        self.extremes.map(|(min, _)| min)
    }

    #[inline]
    fn max(&self) -> Option<u64> {
        self.extremes.map(|(_, max)| max)
    }

    /// Split `x` into (cluster index, position within cluster).
    #[inline]
    fn split(&self, x: u64) -> (u64, u64) {
        let low_bits = low_bits(self.bits);
        (x >> low_bits, x & ((1u64 << low_bits) - 1))
    }

    #[inline]
    fn join(&self, high: u64, low: u64) -> u64 {
        (high << low_bits(self.bits)) | low
    }

    /// Nearest key of cluster `high` in direction `dir`.
    fn cluster_end(&self, high: u64, dir: Direction) -> u64 {
        match self.clusters.get(&high).and_then(|cluster| cluster.extremes) {
            Some((min, max)) => dir.ends(min, max).0,
            None => panic!(
                "summary lists cluster {high} but no non-empty cluster exists (bits={})",
                self.bits
            ),
        }
    }

    fn contains(&self, x: u64) -> bool {
        let Some((min, max)) = self.extremes else {
            return false;
        };
        if x == min || x == max {
            return true;
        }
        if x < min || x > max {
            return false;
        }
        let (high, low) = self.split(x);
        self.clusters
            .get(&high)
            .is_some_and(|cluster| cluster.contains(low))
    }

    /// Returns `true` if `x` was not already present. `x` must lie in the universe.
    fn insert(&mut self, mut x: u64) -> bool {
        debug_assert!(x <= max_key_for(self.bits));

        let Some((mut min, mut max)) = self.extremes else {
            self.extremes = Some((x, x));
            return true;
        };
        if x == min || x == max {
            return false;
        }
        if min == max {
            self.extremes = Some((min.min(x), max.max(x)));
            return true;
        }

        // Keep the extremes hoisted; whichever key is interior goes down a level.
        if x < min {
            std::mem::swap(&mut x, &mut min);
        } else if x > max {
            std::mem::swap(&mut x, &mut max);
        }
        self.extremes = Some((min, max));

        // A one-bit universe is saturated by its two hoisted keys.
        debug_assert!(self.bits > 1, "interior key in a one-bit universe");

        let (high, low) = self.split(x);
        let (summary_bits, cluster_bits) = (high_bits(self.bits), low_bits(self.bits));
        match self.clusters.entry(high) {
            Entry::Occupied(cluster) => cluster.into_mut().insert(low),
            Entry::Vacant(slot) => {
                let summary = self.summary.get_or_insert_with(|| {
                    trace_log!(bits = summary_bits, "created summary");
                    Box::new(Node::new(summary_bits))
                });
                summary.insert(high);
                trace_log!(bits = cluster_bits, cluster = high, "created cluster");
                slot.insert(Node::new(cluster_bits)).insert(low)
            }
        }
    }

    /// Returns `true` if `x` was present.
    fn remove(&mut self, x: u64) -> bool {
        let Some((min, max)) = self.extremes else {
            return false;
        };

        if min == max {
            if x != min {
                return false;
            }
            debug_assert!(self.summary.is_none() && self.clusters.is_empty());
            self.extremes = None;
            return true;
        }

        if x == min || x == max {
            let dir = if x == min {
                Direction::Forward
            } else {
                Direction::Backward
            };
            let Some(summary) = self.summary.as_deref() else {
                let other = if x == min { max } else { min };
                self.extremes = Some((other, other));
                return true;
            };

            // Promote the nearest remaining key out of the clusters into the vacated slot.
            let high = match summary.extremes {
                Some((lo, hi)) => dir.ends(lo, hi).0,
                None => panic!("empty summary kept alive (bits={})", self.bits),
            };
            let low = self.cluster_end(high, dir);
            let promoted = self.join(high, low);
            self.extremes = Some(match dir {
                Direction::Forward => (promoted, max),
                Direction::Backward => (min, promoted),
            });
            let removed = self.remove_from_cluster(high, low);
            debug_assert!(removed, "promoted key {promoted} missing from its cluster");
            return true;
        }

        if x < min || x > max {
            return false;
        }
        let (high, low) = self.split(x);
        self.remove_from_cluster(high, low)
    }

    /// Remove `low` from cluster `high`, dropping the cluster (and its summary entry)
    /// once it is empty.
    fn remove_from_cluster(&mut self, high: u64, low: u64) -> bool {
        let Some(cluster) = self.clusters.get_mut(&high) else {
            return false;
        };
        if !cluster.remove(low) {
            return false;
        }
        if cluster.is_empty() {
            self.clusters.remove(&high);
            trace_log!(bits = self.bits, cluster = high, "dropped empty cluster");

            let Some(summary) = self.summary.as_deref_mut() else {
                panic!(
                    "cluster {high} existed without a summary (bits={})",
                    self.bits
                );
            };
            summary.remove(high);
            if summary.is_empty() {
                self.summary = None;
                trace_log!(bits = self.bits, "dropped empty summary");
            }
        }
        true
    }

    /// Successor (`Forward`) or predecessor (`Backward`) of `x`.
    fn neighbor(&self, x: u64, dir: Direction) -> Option<u64> {
        let (min, max) = self.extremes?;
        let (near, far) = dir.ends(min, max);

        if !dir.precedes(x, far) {
            return None;
        }
        if dir.precedes(x, near) {
            return Some(near);
        }

        if let Some(summary) = self.summary.as_deref() {
            let (high, low) = self.split(x);
            let in_cluster = self
                .clusters
                .get(&high)
                .and_then(|cluster| cluster.neighbor(low, dir));
            if let Some(found) = in_cluster {
                return Some(self.join(high, found));
            }
            if let Some(next_high) = summary.neighbor(high, dir) {
                return Some(self.join(next_high, self.cluster_end(next_high, dir)));
            }
        }

        Some(far)
    }
}

// =============================================================================
// VebTree
// =============================================================================

/// An ordered set of `u64` keys from a fixed universe `[0, 2^S)`, `1 <= S <= 64`.
///
/// Requires exclusive access per call; wrap it in a lock to share it.
#[derive(Clone, PartialEq, Eq)]
pub struct VebTree {
    root: Node,
    len: usize,
}

impl VebTree {
    /// Create an empty tree over `[0, 2^universe_bits)`.
    ///
    /// # Errors
    /// [`VebError::InvalidUniverse`] unless `1 <= universe_bits <= 64`.
    pub fn new(universe_bits: u32) -> Result<Self, VebError> {
        if !(1..=MAX_UNIVERSE_BITS).contains(&universe_bits) {
            return Err(VebError::InvalidUniverse {
                bits: universe_bits,
            });
        }
        debug_log!(universe_bits, "created vEB tree");
        Ok(Self {
            root: Node::new(universe_bits),
            len: 0,
        })
    }

    /// Create an empty tree over the smallest universe that holds `max_key`.
    pub fn with_max_key(max_key: u64) -> Self {
        let universe_bits = (u64::BITS - max_key.leading_zeros()).max(1);
        debug_log!(universe_bits, max_key, "created vEB tree");
        Self {
            root: Node::new(universe_bits),
            len: 0,
        }
    }

    #[inline]
    pub fn universe_bits(&self) -> u32 {
        self.root.bits
    }

    /// Largest key this tree accepts, `2^S - 1`.
    #[inline]
    pub fn max_key(&self) -> u64 {
        max_key_for(self.root.bits)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    #[inline]
    pub fn min(&self) -> Option<u64> {
        self.root.min()
    }

    #[inline]
    pub fn max(&self) -> Option<u64> {
        self.root.max()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.root.contains(key)
    }

    /// Add `key`, returning `Ok(true)` if it was not already present.
    ///
    /// # Errors
    /// [`VebError::OutOfRange`] if `key > self.max_key()`. The tree is left untouched.
    pub fn insert(&mut self, key: u64) -> Result<bool, VebError> {
        if key > self.max_key() {
            return Err(VebError::OutOfRange {
                key,
                bits: self.root.bits,
            });
        }
        let added = self.root.insert(key);
        if added {
            self.len += 1;
        }
        Ok(added)
    }

    /// Remove `key`, returning whether it was present. Absent keys are a no-op.
    pub fn remove(&mut self, key: u64) -> bool {
        let removed = self.root.remove(key);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Smallest member strictly greater than `key`.
    pub fn successor(&self, key: u64) -> Option<u64> {
        self.root.neighbor(key, Direction::Forward)
    }

    /// Largest member strictly less than `key`.
    pub fn predecessor(&self, key: u64) -> Option<u64> {
        self.root.neighbor(key, Direction::Backward)
    }

    /// Remove every key, keeping the universe.
    pub fn clear(&mut self) {
        debug_log!(universe_bits = self.root.bits, len = self.len, "cleared vEB tree");
        self.root = Node::new(self.root.bits);
        self.len = 0;
    }

    /// Ascending iterator over all keys. Reversible.
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self, self.min(), self.max())
    }

    /// Ascending iterator over the keys inside `range`.
    ///
    /// ```rust
    /// use veb_tree::VebTree;
    ///
    /// let mut tree = VebTree::new(8)?;
    /// for key in [1, 4, 9, 16, 25] {
    ///     tree.insert(key)?;
    /// }
    /// assert_eq!(tree.range(4..16).collect::<Vec<_>>(), vec![4, 9]);
    /// assert_eq!(tree.range(..=16).rev().collect::<Vec<_>>(), vec![16, 9, 4, 1]);
    /// # Ok::<(), veb_tree::VebError>(())
    /// ```
    pub fn range<R>(&self, range: R) -> Iter<'_>
    where
        R: RangeBounds<u64>,
    {
        let front = match range.start_bound() {
            Bound::Included(&start) => self.ceiling(start),
            Bound::Excluded(&start) => self.successor(start),
            Bound::Unbounded => self.min(),
        };
        let back = match range.end_bound() {
            Bound::Included(&end) => self.floor(end),
            Bound::Excluded(&end) => self.predecessor(end),
            Bound::Unbounded => self.max(),
        };
        Iter::new(self, front, back)
    }

    /// Smallest member `>= key`.
    fn ceiling(&self, key: u64) -> Option<u64> {
        if self.contains(key) {
            Some(key)
        } else {
            self.successor(key)
        }
    }

    /// Largest member `<= key`.
    fn floor(&self, key: u64) -> Option<u64> {
        if self.contains(key) {
            Some(key)
        } else {
            self.predecessor(key)
        }
    }
}

impl std::fmt::Debug for VebTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a VebTree {
    type Item = u64;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the keys of a [`VebTree`], walking by successor / predecessor.
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    tree: &'a VebTree,
    /// Next key from the front; `None` once exhausted, together with `back`.
    front: Option<u64>,
    back: Option<u64>,
}

impl<'a> Iter<'a> {
    fn new(tree: &'a VebTree, front: Option<u64>, back: Option<u64>) -> Self {
        match (front, back) {
            (Some(f), Some(b)) if f <= b => Self { tree, front, back },
            _ => Self {
                tree,
                front: None,
                back: None,
            },
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let key = self.front?;
        if self.back == Some(key) {
            self.front = None;
            self.back = None;
        } else {
            self.front = self.tree.successor(key);
        }
        Some(key)
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<u64> {
        let key = self.back?;
        if self.front == Some(key) {
            self.front = None;
            self.back = None;
        } else {
            self.back = self.tree.predecessor(key);
        }
        Some(key)
    }
}

impl FusedIterator for Iter<'_> {}
