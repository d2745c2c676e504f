//! # parbp
//!
//! Parallel construction and navigation of succinct trees encoded as
//! balanced parentheses.
//!
//! An ordered rooted tree of `n/2` nodes is stored as `n` bits (`1` =
//! open, `0` = close). A range min-max tree over 256-bit chunks of the
//! sequence supports `find_close` and the general `fwd_search` primitive
//! in logarithmic time, using `2n + o(n)` bits in total. Construction is
//! data-parallel over the rayon thread pool; queries are read-only and
//! freely concurrent.
//!
//! ## Quick Start
//!
//! ```
//! use parbp::{BitVec, SuccinctTree};
//!
//! let text = "()".repeat(200);
//! let bits = BitVec::from_parentheses(&text).unwrap();
//! let tree = SuccinctTree::new(bits).unwrap();
//!
//! assert_eq!(tree.find_close(0), Some(1));
//! assert_eq!(tree.find_close(398), Some(399));
//! ```
//!
//! ## Features
//!
//! - `serde` - Enable serialization/deserialization support

mod bitvec;
mod bp;
mod error;
mod rmm;
mod table;

pub use bitvec::BitVec;
pub use bp::SuccinctTree;
pub use error::Error;
pub use rmm::{RangeMinMax, CHUNK_BITS};
