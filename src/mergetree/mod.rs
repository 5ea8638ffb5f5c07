//! Merge tree of one bucket.
//!
//! Records of a bucket live in a write buffer and in data files spread over
//! levels. The [`MergeTreeWriter`] flushes the buffer into level 0 and keeps
//! the levels compacted; the [`MergeFunction`] decides how the versions of a
//! key collapse into one record, both when reading and when compacting.

pub mod increment;
pub mod levels;
pub mod merge_function;
pub mod writer;

pub use increment::Increment;
pub use levels::{Levels, SortedRun};
pub use merge_function::{AggregateFunction, MergeFunction};
pub use writer::MergeTreeWriter;
