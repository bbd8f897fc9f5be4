//! Binary row decoder module
//!
//! Supports: PostgreSQL binary COPY, single text column per row
//!
//! # Overview
//!
//! Bulk exports are spooled to temporary files in the binary COPY format.
//! `CopyBinaryReader` replays such a file row by row and deletes it once
//! closed; `CopyBinaryWriter` produces the same framing for drivers that
//! cannot emit it natively.

mod copy_binary;
mod types;

pub use copy_binary::{CopyBinaryReader, CopyBinaryWriter, COPY_SIGNATURE};
pub use types::NullFieldPolicy;

#[cfg(test)]
mod tests;
