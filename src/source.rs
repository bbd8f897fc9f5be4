//! Interfaces to the database driver and catalog
//!
//! The extraction iterators only talk to Postgres through these traits, so a
//! driver (see [`crate::database::DatabaseEngine`]) or an in-memory fake can be
//! plugged in.

use crate::ctid::{ChunkQuery, Ctid, CTID_COLUMN};
use crate::error::{Error, Result};
use crate::types::{Filenode, JsonObject, StreamDescriptor};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::AsyncWrite;

/// Rows of a streaming query, each an object that includes the `ctid` column
pub type RowStream = BoxStream<'static, Result<JsonObject>>;

/// Runs chunk queries
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Open a streaming query over the chunk, rows in address order.
    ///
    /// The stream is dropped before the next chunk is opened.
    async fn stream_query(&self, query: &ChunkQuery) -> Result<RowStream>;

    /// Bulk export the chunk in binary COPY format, one JSON text column per
    /// row. Returns the number of bytes written.
    async fn bulk_export(
        &self,
        query: &ChunkQuery,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;
}

/// Reads table metadata
#[async_trait]
pub trait CatalogProbe: Send + Sync {
    /// Current filenode of the relation; `None` when it has none or is gone
    async fn relation_filenode(&self, stream: &StreamDescriptor) -> Result<Option<Filenode>>;

    /// Estimated on-disk size of the relation in bytes
    async fn relation_size(&self, stream: &StreamDescriptor) -> Result<u64>;

    /// Heap page size in bytes
    async fn block_size(&self) -> Result<u64>;

    /// Whether `ctid > x AND ctid <= y` runs as a TID range scan
    async fn supports_tid_range_scan(&self) -> Result<bool>;
}

/// A row together with its physical address
#[derive(Debug, Clone, PartialEq)]
pub struct AddressedRow {
    /// Where the row was read
    pub ctid: Ctid,
    /// Column values, address removed
    pub data: JsonObject,
}

impl AddressedRow {
    /// Split the `ctid` column off a raw row
    pub fn from_object(stream: &StreamDescriptor, mut data: JsonObject) -> Result<Self> {
        let ctid = match data.remove(CTID_COLUMN) {
            Some(serde_json::Value::String(text)) => Ctid::parse(&text)?,
            Some(other) => {
                return Err(Error::query(
                    stream.to_string(),
                    format!("row has a non-text ctid column: {other}"),
                ))
            }
            None => {
                return Err(Error::query(
                    stream.to_string(),
                    "row is missing the ctid column",
                ))
            }
        };
        Ok(Self { ctid, data })
    }

    /// Parse a JSON text payload of a bulk export
    pub fn from_json_text(stream: &StreamDescriptor, text: &str) -> Result<Self> {
        match serde_json::from_str(text) {
            Ok(serde_json::Value::Object(object)) => Self::from_object(stream, object),
            Ok(other) => Err(Error::decode(format!(
                "expected a JSON object for stream '{stream}', got {other}"
            ))),
            Err(e) => Err(Error::decode(format!(
                "invalid JSON row for stream '{stream}': {e}"
            ))),
        }
    }
}
