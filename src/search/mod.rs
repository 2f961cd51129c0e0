//! Metadata filtering for vector search.
//!
//! [`filter::Filter`] is a recursive expression tree evaluated against a
//! record's metadata during HNSW traversal.

mod filter;

pub use filter::{BoolOp, CompareOp, Filter, RawFilter, MAX_DEPTH, MAX_SET_SIZE};
