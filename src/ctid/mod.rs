//! Physical row addressing and chunk planning
//!
//! # Overview
//!
//! The ctid module provides:
//! - `Ctid` - `(page, tuple)` row address with total order and text form
//! - `ChunkRange` - half-open address range, optionally unbounded above
//! - `plan` / `ChunkPlanner` - splits a table into ranges from its size
//! - `ChunkQuery` - compiles a range into SQL for TID-range or legacy servers

mod planner;
mod query;
mod types;

pub use planner::{plan, ChunkPlanner, ScanMode};
pub use query::{range_predicate, ChunkQuery, Projection, CTID_COLUMN};
pub use types::{ChunkRange, Ctid};

#[cfg(test)]
mod tests;
