//! Forward search over a balanced-parentheses sequence.
//!
//! In BP encoding:
//! - `1` = open parenthesis `(`
//! - `0` = close parenthesis `)`
//!
//! `excess(i)` is the number of opens minus closes in positions `[0, i]`.
//! The fundamental navigation primitive is `fwd_search(i, d)`: the
//! smallest `j > i` with `excess(j) - excess(i) = d`. `find_close` is
//! `fwd_search(i, -1)`, the matching close of the open at `i`.
//!
//! # Algorithm
//!
//! A query resolves in one of three ways:
//!
//! 1. inside the 256-bit chunk containing `i`, by a byte-at-a-time scan
//!    driven by the [`crate::table`] lookup tables;
//! 2. in the chunk's right-sibling leaf of the range min-max tree, when
//!    that leaf's `[min, max]` excess interval contains the target;
//! 3. by climbing the tree until a right sibling's interval contains the
//!    target, then descending left-first to the covering chunk.
//!
//! Based on Navarro & Sadakane, "Fully Functional Static and Dynamic
//! Succinct Trees", and the parallel construction of Ferres et al.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bitvec::BitVec;
use crate::error::Error;
use crate::rmm::{self, RangeMinMax, CHUNK_BITS};
use crate::table::{NEAR_FWD_POS, WORD_SUM};

/// A succinct ordered tree: a balanced-parentheses sequence plus its
/// range min-max index.
///
/// Queries are read-only; a built tree can be shared across threads
/// without synchronization.
///
/// # Example
///
/// ```
/// use parbp::{BitVec, SuccinctTree};
///
/// // A path of 200 nodes: 200 opens followed by 200 closes.
/// let text = format!("{}{}", "(".repeat(200), ")".repeat(200));
/// let bits = BitVec::from_parentheses(&text).unwrap();
/// let tree = SuccinctTree::new(bits).unwrap();
///
/// assert_eq!(tree.find_close(0), Some(399));
/// assert_eq!(tree.find_close(10), Some(389));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SuccinctTree {
    bits: BitVec,
    index: RangeMinMax,
}

impl SuccinctTree {
    /// Build the index over a balanced-parentheses sequence, in parallel
    /// over the current rayon thread pool.
    ///
    /// Fails when the sequence does not exceed one chunk or is too long
    /// for the 16-bit summary arithmetic; see [`RangeMinMax::build`].
    pub fn new(bits: BitVec) -> Result<Self, Error> {
        let index = RangeMinMax::build(&bits)?;
        Ok(Self { bits, index })
    }

    /// Number of parentheses in the sequence.
    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Always false: construction rejects empty input.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// The underlying bit sequence.
    #[inline]
    pub fn bits(&self) -> &BitVec {
        &self.bits
    }

    /// The range min-max index.
    #[inline]
    pub fn index(&self) -> &RangeMinMax {
        &self.index
    }

    /// Check if the bit at position `i` is an open parenthesis.
    #[inline]
    pub fn is_open(&self, i: usize) -> bool {
        i < self.bits.len() && self.bits.get(i)
    }

    /// Check if the bit at position `i` is a close parenthesis.
    #[inline]
    pub fn is_close(&self, i: usize) -> bool {
        i < self.bits.len() && !self.bits.get(i)
    }

    /// Excess at position `i`: opens minus closes in `[0, i]`.
    ///
    /// Returns 0 if `i` is out of bounds.
    pub fn excess(&self, i: usize) -> i32 {
        if i >= self.bits.len() {
            return 0;
        }
        let chunk = i / CHUNK_BITS;
        let mut e = if chunk == 0 {
            0
        } else {
            i32::from(self.index.chunk_excess(chunk - 1))
        };
        for pos in chunk * CHUNK_BITS..=i {
            e += if self.bits.get(pos) { 1 } else { -1 };
        }
        e
    }

    /// Find the position of the close parenthesis matching the open at `i`.
    ///
    /// Returns `None` if `i` is out of bounds, is not an open parenthesis,
    /// or has no matching close.
    pub fn find_close(&self, i: usize) -> Option<usize> {
        if !self.is_open(i) {
            return None;
        }
        self.fwd_search(i, -1)
    }

    /// Find the smallest `j > i` with `excess(j) - excess(i) = d`.
    ///
    /// Returns `None` if no such position exists.
    pub fn fwd_search(&self, i: usize, d: i32) -> Option<usize> {
        let n = self.bits.len();
        if i >= n {
            return None;
        }

        let chunk = i / CHUNK_BITS;
        let chunk_end = ((chunk + 1) * CHUNK_BITS).min(n);

        // Case 1: the answer lies in the chunk of i. The scan tracks the
        // excess relative to i, offset by -d so the hit is at value 0.
        if let Some(j) = self.scan(i + 1, chunk_end, -d) {
            return Some(j);
        }

        // Absolute target excess for the index probes.
        let target = self.excess(i) + d;

        // Case 2: the answer lies in the chunk's right-sibling leaf.
        let leaf = self.index.leaf(chunk);
        if rmm::is_left_child(leaf) {
            let sibling = rmm::right_sibling(leaf);
            if self.index.contains(sibling, target) {
                return Some(self.scan_chunk(self.index.chunk_of(sibling), target));
            }
        }

        // Case 3: climb until a right sibling's interval contains the
        // target, then descend to the covering chunk, preferring the left
        // child so the smallest position wins.
        let mut node = leaf;
        let mut found = None;
        while !rmm::is_root(node) {
            if rmm::is_left_child(node) {
                let sibling = rmm::right_sibling(node);
                if self.index.contains(sibling, target) {
                    found = Some(sibling);
                    break;
                }
            }
            node = rmm::parent(node);
        }

        let mut node = found?;
        while !self.index.is_leaf(node) {
            let left = rmm::left_child(node);
            if self.index.contains(left, target) {
                node = left;
            } else {
                let right = rmm::right_child(node);
                if !self.index.contains(right, target) {
                    panic!(
                        "range min-max descent failed at node {}: no child contains excess {}",
                        node, target
                    );
                }
                node = right;
            }
        }

        Some(self.scan_chunk(self.index.chunk_of(node), target))
    }

    /// Scan an entire chunk for the position where the absolute excess
    /// reaches `target`. Only called for chunks whose `[min, max]`
    /// interval contains `target`, so the scan cannot miss.
    fn scan_chunk(&self, chunk: usize, target: i32) -> usize {
        let lo = chunk * CHUNK_BITS;
        let hi = (lo + CHUNK_BITS).min(self.bits.len());
        let seed = if chunk == 0 {
            0
        } else {
            i32::from(self.index.chunk_excess(chunk - 1))
        };
        match self.scan(lo, hi, seed - target) {
            Some(j) => j,
            None => panic!(
                "chunk {} claims excess {} in its interval but the scan missed it",
                chunk, target
            ),
        }
    }

    /// Scan positions `[from, end)` for the first where a running value,
    /// starting at `v` and stepping +1 per open and -1 per close, reaches
    /// zero.
    ///
    /// Three sub-phases: bit-by-bit to the next byte boundary, whole bytes
    /// through the lookup tables, then the bit tail.
    fn scan(&self, from: usize, end: usize, mut v: i32) -> Option<usize> {
        let mut pos = from;

        let head_end = end.min(pos.next_multiple_of(8));
        while pos < head_end {
            v += if self.bits.get(pos) { 1 } else { -1 };
            if v == 0 {
                return Some(pos);
            }
            pos += 1;
        }

        let byte_end = pos + (end - pos) / 8 * 8;
        while pos < byte_end {
            let byte = self.bits.byte(pos / 8) as usize;
            // The byte table can only witness a zero crossing when the
            // incoming value is within one byte's reach.
            if (-8..=8).contains(&v) {
                let x = NEAR_FWD_POS[(v + 8) as usize][byte];
                if x < 8 {
                    return Some(pos + x as usize);
                }
            }
            v += i32::from(WORD_SUM[byte]);
            pos += 8;
        }

        while pos < end {
            v += if self.bits.get(pos) { 1 } else { -1 };
            if v == 0 {
                return Some(pos);
            }
            pos += 1;
        }

        None
    }
}
