//! Row address and chunk range types
//!
//! A ctid locates a heap tuple by (page, tuple slot). Ordering is by page,
//! then tuple, which matches the order a sequential or TID range scan
//! returns rows in.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

static INTEGER_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Physical row address: `(page, tuple)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Ctid {
    /// Heap page (block) number
    pub page: u64,
    /// Line pointer within the page; real tuples start at 1
    pub tuple: u64,
}

impl Ctid {
    /// Table origin. No tuple lives here, so `ctid > ZERO` selects every row.
    pub const ZERO: Ctid = Ctid { page: 0, tuple: 0 };

    /// Create a new ctid
    pub const fn new(page: u64, tuple: u64) -> Self {
        Self { page, tuple }
    }

    /// Parse from text using the first two integer runs, e.g. `"(12,3)"`
    pub fn parse(value: &str) -> Result<Self> {
        let mut runs = INTEGER_RUN.find_iter(value);
        let (Some(page), Some(tuple)) = (runs.next(), runs.next()) else {
            return Err(Error::InvalidCtid {
                value: value.to_string(),
            });
        };
        let parse = |s: &str| {
            s.parse::<u64>().map_err(|_| Error::InvalidCtid {
                value: value.to_string(),
            })
        };
        Ok(Self::new(parse(page.as_str())?, parse(tuple.as_str())?))
    }

    /// SQL literal of this address as a `tid`
    pub fn to_sql_literal(&self) -> String {
        format!("'{self}'::tid")
    }
}

impl fmt::Display for Ctid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.page, self.tuple)
    }
}

impl FromStr for Ctid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Ctid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ctid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ctid::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// A half-open range of row addresses: `lower < ctid <= upper`.
///
/// An unbounded upper end means "everything above `lower` at query time".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Exclusive lower bound
    pub lower: Ctid,
    /// Inclusive upper bound, `None` when unbounded
    pub upper: Option<Ctid>,
}

impl ChunkRange {
    /// Range with both ends set
    pub fn bounded(lower: Ctid, upper: Ctid) -> Self {
        Self {
            lower,
            upper: Some(upper),
        }
    }

    /// Range open above `lower`
    pub fn unbounded(lower: Ctid) -> Self {
        Self { lower, upper: None }
    }

    /// Whether the upper end is open
    pub fn is_unbounded(&self) -> bool {
        self.upper.is_none()
    }

    /// Whether the address falls inside this range
    pub fn contains(&self, ctid: Ctid) -> bool {
        ctid > self.lower && self.upper.map_or(true, |upper| ctid <= upper)
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upper {
            Some(upper) => write!(f, "{} -> {}", self.lower, upper),
            None => write!(f, "{} -> unbounded", self.lower),
        }
    }
}
