//! Range min-max tree over a balanced-parentheses sequence.
//!
//! The tree summarizes the excess function of the sequence at chunk
//! granularity: each leaf covers one 256-bit chunk, and every internal node
//! aggregates the minimum excess, maximum excess, and number of positions
//! attaining the minimum over its descendant chunks. Construction runs in
//! parallel over the available rayon workers in four passes:
//!
//! 1. each worker summarizes a contiguous slice of chunks, seeding its
//!    running excess at 0 (worker-local values);
//! 2. a serial `O(p)` sweep turns the slice-boundary excess entries into
//!    global prefix sums;
//! 3. each non-first slice shifts its entries by the global excess at the
//!    end of the previous slice;
//! 4. internal nodes are filled bottom-up, level by level.
//!
//! Workers write to disjoint index ranges in every parallel pass, and the
//! end of each parallel iterator is a barrier, so the final arrays are a
//! pure function of the input regardless of worker count.

use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bitvec::BitVec;
use crate::error::Error;

/// Number of bits summarized by one leaf of the tree.
pub const CHUNK_BITS: usize = 256;

/// Arity of the min-max tree.
const ARITY: usize = 2;

/// Largest supported input length. Summary values are stored as `i16`,
/// and the global excess of a well-formed sequence of `n` bits can reach
/// `n / 2`.
const MAX_BITS: usize = i16::MAX as usize * 2;

/// Sentinel summary for internal nodes whose covered chunk range is empty
/// (partial bottom level). Interval probes on these never succeed and
/// min/max aggregation through them is a no-op.
const EMPTY_MIN: i16 = i16::MAX;
const EMPTY_MAX: i16 = i16::MIN;

/// Excess summary of one contiguous bit range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChunkSummary {
    /// Excess at the end of the range, relative to the seed
    pub excess: i16,
    /// Minimum excess attained inside the range
    pub min: i16,
    /// Maximum excess attained inside the range
    pub max: i16,
    /// Number of positions attaining the minimum
    pub min_count: i16,
}

/// Summarize the bit range `[lo, hi)`, starting from excess `seed`.
///
/// Min and max are seeded with the excess at the first position of the
/// range; the min-count resets to 1 on every strict new minimum and grows
/// by 1 on every equality.
pub(crate) fn summarize(bits: &BitVec, lo: usize, hi: usize, seed: i16) -> ChunkSummary {
    debug_assert!(lo < hi && hi <= bits.len());

    let mut excess = seed;
    let mut min = 0i16;
    let mut max = 0i16;
    let mut min_count = 1i16;

    for pos in lo..hi {
        if bits.get(pos) {
            excess += 1;
        } else {
            excess -= 1;
        }

        if pos == lo {
            min = excess;
            max = excess;
            min_count = 1;
        } else {
            if excess < min {
                min = excess;
                min_count = 1;
            } else if excess == min {
                min_count += 1;
            }
            if excess > max {
                max = excess;
            }
        }
    }

    ChunkSummary {
        excess,
        min,
        max,
        min_count,
    }
}

// ============================================================================
// Implicit-tree index math
// ============================================================================
//
// The tree is laid out in a flat array: internal nodes in breadth-first
// order at indices `[0, internal)`, leaves in chunk order after them.
// Navigation is pure arithmetic.

#[inline]
pub(crate) fn parent(v: usize) -> usize {
    debug_assert!(v > 0);
    (v - 1) / ARITY
}

#[inline]
pub(crate) fn left_child(v: usize) -> usize {
    ARITY * v + 1
}

#[inline]
pub(crate) fn right_child(v: usize) -> usize {
    ARITY * (v + 1)
}

#[inline]
pub(crate) fn is_root(v: usize) -> bool {
    v == 0
}

/// Whether `v` is the leftmost child of its parent. Requires `v > 0`.
#[inline]
pub(crate) fn is_left_child(v: usize) -> bool {
    v == ARITY * parent(v) + 1
}

/// The sibling immediately to the right of a left child.
#[inline]
pub(crate) fn right_sibling(v: usize) -> usize {
    v + 1
}

// ============================================================================
// RangeMinMax
// ============================================================================

/// Immutable excess summaries over a balanced-parentheses sequence.
///
/// Built once by [`RangeMinMax::build`], then read-only; concurrent
/// queries need no synchronization. All arrays are released together when
/// the value is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RangeMinMax {
    /// Global excess at the end of each chunk (leaves only)
    excess: Vec<i16>,
    /// Minimum excess inside each node's covered range
    min_excess: Vec<i16>,
    /// Maximum excess inside each node's covered range
    max_excess: Vec<i16>,
    /// Number of positions attaining the minimum inside each node's range
    min_count: Vec<i16>,
    /// Height of the tree
    height: u32,
    /// Number of internal nodes; leaves start at this index
    internal: usize,
    /// Number of chunk leaves
    num_chunks: usize,
    /// Bit length of the summarized sequence
    len: usize,
}

impl RangeMinMax {
    /// Build the tree from a balanced-parentheses sequence, in parallel
    /// over the current rayon thread pool.
    ///
    /// Fails when the input does not exceed one chunk (each worker must
    /// own at least one chunk) or when it is too long for the 16-bit
    /// summary arithmetic.
    pub fn build(bits: &BitVec) -> Result<Self, Error> {
        let n = bits.len();
        if n <= CHUNK_BITS {
            return Err(Error::InputTooSmall {
                n,
                chunk_size: CHUNK_BITS,
            });
        }
        if n > MAX_BITS {
            return Err(Error::ExcessOverflow { n, limit: MAX_BITS });
        }

        let num_chunks = n.div_ceil(CHUNK_BITS);
        let height = num_chunks.next_power_of_two().trailing_zeros();
        let internal = (1usize << height) - 1;
        let total = internal + num_chunks;

        let workers = rayon::current_num_threads().max(1);
        let chunks_per_worker = num_chunks.div_ceil(workers);
        let num_slices = num_chunks.div_ceil(chunks_per_worker);

        let mut excess = vec![0i16; num_chunks];
        let mut min_excess = vec![EMPTY_MIN; total];
        let mut max_excess = vec![EMPTY_MAX; total];
        let mut min_count = vec![0i16; total];

        // Pass 1: per-worker chunk summaries, excess seeded at 0 per slice.
        {
            let leaf_min = &mut min_excess[internal..];
            let leaf_max = &mut max_excess[internal..];
            let leaf_cnt = &mut min_count[internal..];

            excess
                .par_chunks_mut(chunks_per_worker)
                .zip(leaf_min.par_chunks_mut(chunks_per_worker))
                .zip(leaf_max.par_chunks_mut(chunks_per_worker))
                .zip(leaf_cnt.par_chunks_mut(chunks_per_worker))
                .enumerate()
                .for_each(|(slice, (((e_s, m_s), mx_s), c_s))| {
                    let first_chunk = slice * chunks_per_worker;
                    let mut running = 0i16;

                    for (j, (((e_c, m_c), mx_c), c_c)) in e_s
                        .iter_mut()
                        .zip(m_s.iter_mut())
                        .zip(mx_s.iter_mut())
                        .zip(c_s.iter_mut())
                        .enumerate()
                    {
                        let lo = (first_chunk + j) * CHUNK_BITS;
                        let hi = (lo + CHUNK_BITS).min(n);
                        let summary = summarize(bits, lo, hi, running);
                        running = summary.excess;
                        *e_c = summary.excess;
                        *m_c = summary.min;
                        *mx_c = summary.max;
                        *c_c = summary.min_count;
                    }
                });
        }

        // Pass 2: serial prefix over the slice-boundary excess entries.
        // The last slice's boundary is deliberately skipped; pass 3 shifts
        // every chunk of the last slice, that entry included.
        for t in 1..num_slices.saturating_sub(1) {
            excess[(t + 1) * chunks_per_worker - 1] += excess[t * chunks_per_worker - 1];
        }

        // Pass 3: broadcast the previous slice's global end excess into
        // each non-first slice. Deltas are snapshotted first so the
        // parallel writes never read another slice's entries.
        let deltas: Vec<i16> = (0..num_slices)
            .map(|t| {
                if t == 0 {
                    0
                } else {
                    excess[t * chunks_per_worker - 1]
                }
            })
            .collect();

        {
            let leaf_min = &mut min_excess[internal..];
            let leaf_max = &mut max_excess[internal..];

            excess
                .par_chunks_mut(chunks_per_worker)
                .zip(leaf_min.par_chunks_mut(chunks_per_worker))
                .zip(leaf_max.par_chunks_mut(chunks_per_worker))
                .enumerate()
                .skip(1)
                .for_each(|(t, ((e_s, m_s), mx_s))| {
                    let delta = deltas[t];
                    let last_slice = t == num_slices - 1;
                    let boundary = e_s.len() - 1;

                    for (j, e_c) in e_s.iter_mut().enumerate() {
                        // The boundary entry of a non-final slice is
                        // already global from pass 2.
                        if last_slice || j < boundary {
                            *e_c += delta;
                        }
                    }
                    for m_c in m_s.iter_mut() {
                        *m_c += delta;
                    }
                    for mx_c in mx_s.iter_mut() {
                        *mx_c += delta;
                    }
                });
        }

        debug_assert_eq!(
            excess[num_chunks - 1], 0,
            "input is not a balanced parentheses sequence"
        );

        // Pass 4: fill internal nodes bottom-up. Levels with at least one
        // node per worker are data-parallel; the top of the tree is serial.
        let p_level = workers.next_power_of_two().trailing_zeros();
        for lvl in (0..height).rev() {
            let first = (1usize << lvl) - 1;
            let child_base = (1usize << (lvl + 1)) - 1;

            let (min_up, min_lo) = min_excess.split_at_mut(child_base);
            let (max_up, max_lo) = max_excess.split_at_mut(child_base);
            let (cnt_up, cnt_lo) = min_count.split_at_mut(child_base);
            let (min_lo, max_lo, cnt_lo): (&[i16], &[i16], &[i16]) = (min_lo, max_lo, cnt_lo);

            if lvl >= p_level {
                min_up[first..]
                    .par_iter_mut()
                    .zip(max_up[first..].par_iter_mut())
                    .zip(cnt_up[first..].par_iter_mut())
                    .enumerate()
                    .for_each(|(off, ((m_v, mx_v), c_v))| {
                        let (m, mx, c) =
                            combine_children(first + off, child_base, total, min_lo, max_lo, cnt_lo);
                        *m_v = m;
                        *mx_v = mx;
                        *c_v = c;
                    });
            } else {
                for (off, ((m_v, mx_v), c_v)) in min_up[first..]
                    .iter_mut()
                    .zip(max_up[first..].iter_mut())
                    .zip(cnt_up[first..].iter_mut())
                    .enumerate()
                {
                    let (m, mx, c) =
                        combine_children(first + off, child_base, total, min_lo, max_lo, cnt_lo);
                    *m_v = m;
                    *mx_v = mx;
                    *c_v = c;
                }
            }
        }

        Ok(Self {
            excess,
            min_excess,
            max_excess,
            min_count,
            height,
            internal,
            num_chunks,
            len: n,
        })
    }

    /// Bit length of the summarized sequence.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the tree summarizes no bits. Construction rejects
    /// empty input, so this is false for every built tree.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunk leaves.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.num_chunks
    }

    /// Height of the tree.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Global excess at the end of chunk `c`.
    #[inline]
    pub(crate) fn chunk_excess(&self, c: usize) -> i16 {
        self.excess[c]
    }

    /// Flat-array position of the leaf covering chunk `c`.
    #[inline]
    pub(crate) fn leaf(&self, c: usize) -> usize {
        self.internal + c
    }

    /// Chunk covered by the leaf at position `v`.
    #[inline]
    pub(crate) fn chunk_of(&self, v: usize) -> usize {
        debug_assert!(self.is_leaf(v));
        v - self.internal
    }

    #[inline]
    pub(crate) fn is_leaf(&self, v: usize) -> bool {
        v >= self.internal
    }

    /// Whether the node at `v` exists and its excess interval contains `t`.
    ///
    /// Out-of-range positions (beyond the last leaf) and empty internal
    /// nodes both report false.
    #[inline]
    pub(crate) fn contains(&self, v: usize, t: i32) -> bool {
        v < self.min_excess.len()
            && i32::from(self.min_excess[v]) <= t
            && t <= i32::from(self.max_excess[v])
    }
}

/// Aggregate the summaries of a node's children. Children beyond the
/// populated range are skipped; a childless node keeps the empty sentinel.
fn combine_children(
    pos: usize,
    child_base: usize,
    total: usize,
    min_lo: &[i16],
    max_lo: &[i16],
    cnt_lo: &[i16],
) -> (i16, i16, i16) {
    let mut min = EMPTY_MIN;
    let mut max = EMPTY_MAX;
    let mut count = 0i16;

    let first_child = left_child(pos);
    for child in first_child..first_child + ARITY {
        if child >= total {
            break;
        }
        let idx = child - child_base;
        let child_min = min_lo[idx];
        if child_min < min {
            min = child_min;
            count = cnt_lo[idx];
        } else if child_min == min {
            count += cnt_lo[idx];
        }
        if max_lo[idx] > max {
            max = max_lo[idx];
        }
    }

    (min, max, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Generate a random balanced parentheses sequence with `node_count`
    /// nodes, capped at `max_depth`.
    fn generate_balanced_parens(node_count: usize, max_depth: usize, seed: u64) -> BitVec {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut bits = Vec::with_capacity(node_count * 2);
        let mut depth = 0usize;

        while bits.len() < node_count * 2 {
            if depth == 0 {
                bits.push(true);
                depth += 1;
            } else if depth >= max_depth {
                bits.push(false);
                depth -= 1;
            } else if rng.gen_bool(0.55) {
                bits.push(true);
                depth += 1;
            } else {
                bits.push(false);
                depth -= 1;
            }
        }
        while depth > 0 {
            bits.push(false);
            depth -= 1;
        }

        let len = bits.len();
        let mut words = vec![0u64; len.div_ceil(64)];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                words[i / 64] |= 1 << (i % 64);
            }
        }
        BitVec::from_words(words, len)
    }

    /// Naive global excess at every position.
    fn excess_prefix(bits: &BitVec) -> Vec<i32> {
        let mut out = Vec::with_capacity(bits.len());
        let mut e = 0i32;
        for i in 0..bits.len() {
            e += if bits.get(i) { 1 } else { -1 };
            out.push(e);
        }
        out
    }

    /// Chunks covered by the node at position `v`, clamped to the
    /// populated leaf range.
    fn covered_chunks(tree: &RangeMinMax, v: usize) -> std::ops::Range<usize> {
        if tree.is_leaf(v) {
            let c = tree.chunk_of(v);
            return c..c + 1;
        }
        let lvl = (v + 1).ilog2();
        let span = 1usize << (tree.height - lvl);
        let first = (v + 1 - (1usize << lvl)) * span;
        first.min(tree.num_chunks)..(first + span).min(tree.num_chunks)
    }

    #[test]
    fn test_rejects_small_input() {
        let bits = BitVec::from_parentheses(&"()".repeat(128)).unwrap();
        assert_eq!(bits.len(), 256);
        assert_eq!(
            RangeMinMax::build(&bits),
            Err(Error::InputTooSmall {
                n: 256,
                chunk_size: 256
            })
        );
    }

    #[test]
    fn test_rejects_oversized_input() {
        let n = MAX_BITS + 2;
        let bits = BitVec::from_words(vec![0u64; n.div_ceil(64)], n);
        assert_eq!(
            RangeMinMax::build(&bits),
            Err(Error::ExcessOverflow { n, limit: MAX_BITS })
        );
    }

    #[test]
    fn test_shape() {
        // 600 bits -> 3 chunks -> height 2, 3 internal nodes.
        let bits = BitVec::from_parentheses(&"()".repeat(300)).unwrap();
        let tree = RangeMinMax::build(&bits).unwrap();
        assert_eq!(tree.chunk_count(), 3);
        assert_eq!(tree.height(), 2);
        assert_eq!(tree.internal, 3);
        assert_eq!(tree.leaf(0), 3);
        assert!(tree.is_leaf(3));
        assert!(!tree.is_leaf(2));
    }

    #[test]
    fn test_index_math() {
        assert_eq!(parent(1), 0);
        assert_eq!(parent(2), 0);
        assert_eq!(parent(6), 2);
        assert_eq!(left_child(0), 1);
        assert_eq!(right_child(0), 2);
        assert!(is_root(0));
        assert!(is_left_child(1));
        assert!(!is_left_child(2));
        assert!(is_left_child(5));
        assert_eq!(right_sibling(5), 6);
    }

    /// e'[c] equals the naive signed sum through the end of each chunk.
    #[test]
    fn test_chunk_excess_matches_naive() {
        for seed in [1u64, 2, 3] {
            let bits = generate_balanced_parens(2000, 60, seed);
            let tree = RangeMinMax::build(&bits).unwrap();
            let prefix = excess_prefix(&bits);

            for c in 0..tree.chunk_count() {
                let end = ((c + 1) * CHUNK_BITS).min(bits.len()) - 1;
                assert_eq!(
                    i32::from(tree.chunk_excess(c)),
                    prefix[end],
                    "chunk {c} (seed {seed})"
                );
            }
        }
    }

    /// Leaf min/max/min-count match a naive scan of each chunk.
    #[test]
    fn test_leaf_aggregates_match_naive() {
        for seed in [4u64, 5, 6] {
            let bits = generate_balanced_parens(2000, 60, seed);
            let tree = RangeMinMax::build(&bits).unwrap();
            let prefix = excess_prefix(&bits);

            for c in 0..tree.chunk_count() {
                let lo = c * CHUNK_BITS;
                let hi = ((c + 1) * CHUNK_BITS).min(bits.len());
                let window = &prefix[lo..hi];
                let min = *window.iter().min().unwrap();
                let max = *window.iter().max().unwrap();
                let count = window.iter().filter(|&&e| e == min).count();

                let v = tree.leaf(c);
                assert_eq!(i32::from(tree.min_excess[v]), min, "min, chunk {c}");
                assert_eq!(i32::from(tree.max_excess[v]), max, "max, chunk {c}");
                assert_eq!(tree.min_count[v] as usize, count, "count, chunk {c}");
            }
        }
    }

    /// Internal aggregates equal the fold of their covered leaves; empty
    /// nodes keep the sentinel summary.
    #[test]
    fn test_internal_aggregates_match_leaves() {
        for seed in [8u64, 9] {
            let bits = generate_balanced_parens(3000, 80, seed);
            let tree = RangeMinMax::build(&bits).unwrap();

            for v in 0..tree.internal {
                let chunks = covered_chunks(&tree, v);
                if chunks.is_empty() {
                    assert_eq!(tree.min_excess[v], EMPTY_MIN, "empty node {v}");
                    assert_eq!(tree.max_excess[v], EMPTY_MAX, "empty node {v}");
                    assert_eq!(tree.min_count[v], 0, "empty node {v}");
                    continue;
                }
                let min = chunks
                    .clone()
                    .map(|c| tree.min_excess[tree.leaf(c)])
                    .min()
                    .unwrap();
                let max = chunks
                    .clone()
                    .map(|c| tree.max_excess[tree.leaf(c)])
                    .max()
                    .unwrap();
                let count: i16 = chunks
                    .clone()
                    .filter(|&c| tree.min_excess[tree.leaf(c)] == min)
                    .map(|c| tree.min_count[tree.leaf(c)])
                    .sum();

                assert_eq!(tree.min_excess[v], min, "min, node {v} over {chunks:?}");
                assert_eq!(tree.max_excess[v], max, "max, node {v} over {chunks:?}");
                assert_eq!(tree.min_count[v], count, "count, node {v} over {chunks:?}");
            }
        }
    }

    /// All opens then all closes: the root interval is [0, n/2] and the
    /// minimum (the final 0) occurs exactly once.
    #[test]
    fn test_pathological_root_aggregates() {
        let n = 4096;
        let mut words = vec![0u64; n / 64];
        for w in &mut words[..n / 128] {
            *w = u64::MAX;
        }
        let bits = BitVec::from_words(words, n);
        let tree = RangeMinMax::build(&bits).unwrap();

        assert_eq!(tree.min_excess[0], 0);
        assert_eq!(tree.max_excess[0], (n / 2) as i16);
        assert_eq!(tree.min_count[0], 1);
    }

    /// The root interval of any well-formed sequence starts at 0.
    #[test]
    fn test_root_invariant() {
        let bits = generate_balanced_parens(4000, 100, 11);
        let tree = RangeMinMax::build(&bits).unwrap();
        assert_eq!(tree.min_excess[0], 0);
        assert!(tree.max_excess[0] > 0);
    }

    /// Identical arrays regardless of worker count.
    #[test]
    fn test_deterministic_across_worker_counts() {
        let bits = generate_balanced_parens(2048, 50, 42);

        let reference = RangeMinMax::build(&bits).unwrap();
        for workers in [1usize, 2, 4, 8] {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .unwrap();
            let tree = pool.install(|| RangeMinMax::build(&bits)).unwrap();
            assert_eq!(tree, reference, "workers = {workers}");
        }
    }

    #[test]
    fn test_summarize_seeds_min_max_at_first_position() {
        // "))((": excess walks -1, -2, -1, 0 from seed 0.
        let bits = BitVec::from_words(vec![0b1100], 4);
        let s = summarize(&bits, 0, 4, 0);
        assert_eq!(
            s,
            ChunkSummary {
                excess: 0,
                min: -2,
                max: 0,
                min_count: 1
            }
        );

        // Same range seeded at 10.
        let s = summarize(&bits, 0, 4, 10);
        assert_eq!(
            s,
            ChunkSummary {
                excess: 10,
                min: 8,
                max: 10,
                min_count: 1
            }
        );
    }

    #[test]
    fn test_summarize_counts_min_repeats() {
        // "()()": excess 1, 0, 1, 0 -> min 0 attained twice.
        let bits = BitVec::from_parentheses("()()").unwrap();
        let s = summarize(&bits, 0, 4, 0);
        assert_eq!(s.min, 0);
        assert_eq!(s.min_count, 2);
        assert_eq!(s.max, 1);
    }
}
