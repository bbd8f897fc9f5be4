//! SQL compilation for chunk queries

use super::planner::ScanMode;
use super::types::ChunkRange;
use crate::types::{quote_ident, quote_literal, StreamDescriptor};

/// Name under which the row address is projected
pub const CTID_COLUMN: &str = "ctid";

/// Shape of the projected rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Address column followed by the table's columns
    Columns,
    /// One text column holding a JSON object, address included under `ctid`
    JsonText,
}

/// A query for one chunk of one stream.
///
/// Drivers execute `sql` (or [`ChunkQuery::copy_statement`] for bulk export);
/// the structured fields describe the same query for callers that do not
/// speak SQL.
#[derive(Debug, Clone)]
pub struct ChunkQuery {
    /// Stream being read
    pub stream: StreamDescriptor,
    /// Selected columns, empty for all
    pub columns: Vec<String>,
    /// Address range of the chunk
    pub range: ChunkRange,
    /// Position of the chunk in the plan
    pub chunk_index: usize,
    /// Projection used by `sql`
    pub projection: Projection,
    /// Rendered SELECT statement
    pub sql: String,
}

impl ChunkQuery {
    /// Build the query for a chunk
    pub fn new(
        stream: &StreamDescriptor,
        columns: &[String],
        range: ChunkRange,
        chunk_index: usize,
        mode: ScanMode,
        projection: Projection,
    ) -> Self {
        let select_list = match projection {
            Projection::Columns => columns_projection(columns),
            Projection::JsonText => json_projection(columns),
        };
        let sql = format!(
            "SELECT {select_list} FROM {} AS t WHERE {}",
            stream.quoted_table_name(),
            range_predicate(&range, mode)
        );

        Self {
            stream: stream.clone(),
            columns: columns.to_vec(),
            range,
            chunk_index,
            projection,
            sql,
        }
    }

    /// Binary COPY statement exporting this chunk.
    ///
    /// Hook for drivers that speak the COPY protocol directly. The DuckDB
    /// driver cannot run COPY through `postgres_query`, so it streams the
    /// JSON projection and re-frames it with [`crate::decode::CopyBinaryWriter`].
    pub fn copy_statement(&self) -> String {
        format!("COPY ({}) TO STDOUT WITH (FORMAT binary)", self.sql)
    }
}

fn columns_projection(columns: &[String]) -> String {
    let ctid = format!("t.ctid::text AS {}", quote_ident(CTID_COLUMN));
    if columns.is_empty() {
        return format!("{ctid}, t.*");
    }
    let cols = columns
        .iter()
        .map(|c| format!("t.{}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{ctid}, {cols}")
}

fn json_projection(columns: &[String]) -> String {
    let ctid_pair = format!("{}, t.ctid::text", quote_literal(CTID_COLUMN));
    if columns.is_empty() {
        return format!("(jsonb_build_object({ctid_pair}) || to_jsonb(t))::text");
    }
    let pairs = columns
        .iter()
        .map(|c| format!("{}, t.{}", quote_literal(c), quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("json_build_object({ctid_pair}, {pairs})::text")
}

/// WHERE clause selecting the rows of `range`
pub fn range_predicate(range: &ChunkRange, mode: ScanMode) -> String {
    let lower = format!("t.ctid > {}", range.lower.to_sql_literal());
    let Some(upper) = range.upper else {
        return lower;
    };
    let upper_cond = format!("t.ctid <= {}", upper.to_sql_literal());

    match mode {
        ScanMode::TidRange => format!("{lower} AND {upper_cond}"),
        ScanMode::Legacy {
            max_tuples_per_page,
        } => {
            // (p,0) never holds a tuple, so an upper bound at tuple 0 ends on the previous page
            let last_page = if upper.tuple == 0 {
                upper.page.saturating_sub(1)
            } else {
                upper.page
            };
            format!(
                "t.ctid = ANY (ARRAY (SELECT FORMAT('(%s,%s)', page, tuple)::tid \
                 FROM generate_series({}, {last_page}) AS page, \
                 generate_series(1, {max_tuples_per_page}) AS tuple \
                 ORDER BY page, tuple)) AND {lower} AND {upper_cond}",
                range.lower.page
            )
        }
    }
}
