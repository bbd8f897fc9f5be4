//! DuckDB-backed PostgreSQL driver
//!
//! The source database is attached through DuckDB's postgres extension and
//! every statement is pushed down verbatim with `postgres_query`, so ctid
//! predicates and catalog functions run on the Postgres server itself.

use crate::config::ConnectionConfig;
use crate::ctid::{ChunkQuery, Projection};
use crate::decode::CopyBinaryWriter;
use crate::error::{Error, Result};
use crate::source::{CatalogProbe, QueryExecutor, RowStream};
use crate::state::XminStatus;
use crate::types::{quote_literal, Filenode, JsonObject, JsonValue, StreamDescriptor};
use async_trait::async_trait;
use bytes::Bytes;
use duckdb::types::FromSql;
use duckdb::Connection;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Catalog alias of the attached Postgres database
const SOURCE_ALIAS: &str = "source_db";

/// Rows encoded before a buffer is handed to the export sink
const EXPORT_BATCH_ROWS: usize = 1_000;

const XMIN_STATUS_SQL: &str = "SELECT \
     (txid_snapshot_xmin(txid_current_snapshot()) >> 32) AS num_wraparound, \
     (txid_snapshot_xmin(txid_current_snapshot()) % (2^32)::bigint) AS xmin_xid_value, \
     txid_snapshot_xmin(txid_current_snapshot()) AS xmin_raw_value";

static URL_PASSWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"://([^:/@]+):[^@]*@").expect("valid regex"));

/// Postgres driver using DuckDB as the client
pub struct DatabaseEngine {
    /// DuckDB connection; statements run on clones of it
    conn: Mutex<Connection>,
    /// Connection string used (for logging)
    connection_string: String,
    /// Rows buffered between the blocking reader and the consumer
    fetch_size: usize,
}

impl DatabaseEngine {
    /// Connect and attach the source database
    pub fn new(connection: &ConnectionConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::config(format!("Failed to create DuckDB connection: {e}")))?;
        let connection_string = connection.to_url()?;
        attach_postgres(&conn, &connection_string)?;
        info!(source = %redact(&connection_string), "Attached PostgreSQL source");

        Ok(Self {
            conn: Mutex::new(conn),
            connection_string,
            fetch_size: 10_000,
        })
    }

    /// Set the row buffer size
    #[must_use]
    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// Connection string with the password masked
    pub fn connection_info(&self) -> String {
        redact(&self.connection_string)
    }

    /// Test database connection
    pub async fn check_connection(&self) -> Result<()> {
        self.scalar::<i32>("SELECT 1")
            .await
            .map_err(|e| Error::config(format!("Connection check failed: {e}")))?;
        Ok(())
    }

    /// Current transaction id watermark of the server
    pub async fn xmin_status(&self) -> Result<XminStatus> {
        let conn = self.connection()?;
        tokio::task::spawn_blocking(move || -> Result<XminStatus> {
            let mut stmt = conn.prepare(&pushdown(XMIN_STATUS_SQL))?;
            let status = stmt.query_row([], |row| {
                Ok(XminStatus {
                    num_wraparound: row.get::<_, i64>(0)? as u64,
                    xmin_xid_value: row.get::<_, i64>(1)? as u64,
                    xmin_raw_value: row.get::<_, i64>(2)? as u64,
                })
            })?;
            Ok(status)
        })
        .await?
    }

    fn connection(&self) -> Result<Connection> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::config("DuckDB connection lock poisoned"))?;
        Ok(conn.try_clone()?)
    }

    /// First column of the first row of a server-side statement
    async fn scalar<T>(&self, pg_sql: &str) -> Result<Option<T>>
    where
        T: FromSql + Send + 'static,
    {
        let conn = self.connection()?;
        let statement = pushdown(pg_sql);
        debug!(sql = %pg_sql, "Running catalog query");
        tokio::task::spawn_blocking(move || -> Result<Option<T>> {
            let mut stmt = conn.prepare(&statement)?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(row.get::<_, Option<T>>(0)?),
                None => Ok(None),
            }
        })
        .await?
    }

    /// Run a single-text-column statement, delivering rows through a bounded
    /// channel. Dropping the receiver cancels the query.
    fn text_rows(
        &self,
        stream: &StreamDescriptor,
        pg_sql: String,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let conn = self.connection()?;
        let (mut tx, rx) = mpsc::channel(self.fetch_size);
        let stream = stream.to_string();

        tokio::task::spawn_blocking(move || {
            let query_error = |e: duckdb::Error| Error::query(stream.clone(), e.to_string());
            let result = (|| -> Result<()> {
                let mut stmt = conn.prepare(&pushdown(&pg_sql)).map_err(query_error)?;
                let mut rows = stmt.query([]).map_err(query_error)?;
                while let Some(row) = rows.next().map_err(query_error)? {
                    let text: Option<String> = row.get(0).map_err(query_error)?;
                    let text =
                        text.ok_or_else(|| Error::query(stream.clone(), "row serialized to NULL"))?;
                    if futures::executor::block_on(tx.send(Ok(text))).is_err() {
                        debug!(stream = %stream, "Row consumer went away, cancelling query");
                        return Ok(());
                    }
                }
                Ok(())
            })();
            if let Err(e) = result {
                let _ = futures::executor::block_on(tx.send(Err(e)));
            }
        });
        Ok(rx)
    }
}

#[async_trait]
impl QueryExecutor for DatabaseEngine {
    async fn stream_query(&self, query: &ChunkQuery) -> Result<RowStream> {
        debug!(stream = %query.stream, chunk = query.chunk_index, sql = %query.sql, "Streaming chunk");
        let rows = self.text_rows(&query.stream, as_json_text(query))?;
        let stream = query.stream.to_string();
        Ok(rows
            .map(move |text| text.and_then(|t| parse_object(&stream, &t)))
            .boxed())
    }

    async fn bulk_export(
        &self,
        query: &ChunkQuery,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let mut rows = self.text_rows(&query.stream, as_json_text(query))?;
        let mut writer = CopyBinaryWriter::new();
        let mut written = 0u64;
        let mut batched = 0usize;
        let mut total = 0u64;

        while let Some(text) = rows.next().await {
            writer.write_text(Some(&text?));
            batched += 1;
            total += 1;
            if batched == EXPORT_BATCH_ROWS {
                written += write_bytes(sink, writer.split()).await?;
                batched = 0;
            }
        }
        written += write_bytes(sink, writer.finish()).await?;
        sink.flush().await?;

        debug!(
            stream = %query.stream,
            chunk = query.chunk_index,
            rows = total,
            bytes = written,
            "Exported chunk"
        );
        Ok(written)
    }
}

#[async_trait]
impl CatalogProbe for DatabaseEngine {
    async fn relation_filenode(&self, stream: &StreamDescriptor) -> Result<Option<Filenode>> {
        self.scalar::<i64>(&filenode_sql(stream))
            .await
            .map_err(|e| Error::probe(stream.to_string(), e.to_string()))
    }

    async fn relation_size(&self, stream: &StreamDescriptor) -> Result<u64> {
        let size = self
            .scalar::<i64>(&relation_size_sql(stream))
            .await
            .map_err(|e| Error::query(stream.to_string(), e.to_string()))?;
        Ok(size.unwrap_or(0).max(0) as u64)
    }

    async fn block_size(&self) -> Result<u64> {
        let size = self
            .scalar::<i64>("SELECT current_setting('block_size')::bigint")
            .await?;
        size.map(|s| s as u64)
            .ok_or_else(|| Error::config("server did not report block_size"))
    }

    async fn supports_tid_range_scan(&self) -> Result<bool> {
        Ok(self
            .scalar::<bool>("SELECT current_setting('server_version_num')::int >= 140000")
            .await?
            .unwrap_or(false))
    }
}

// ============================================================================
// SQL Helpers
// ============================================================================

fn attach_postgres(conn: &Connection, connection_string: &str) -> Result<()> {
    conn.execute_batch("INSTALL postgres; LOAD postgres;")
        .map_err(|e| Error::config(format!("Failed to load postgres extension: {e}")))?;

    let attach_sql = format!(
        "ATTACH {} AS {SOURCE_ALIAS} (TYPE POSTGRES, READ_ONLY);",
        quote_literal(connection_string)
    );
    conn.execute_batch(&attach_sql)
        .map_err(|e| Error::config(format!("Failed to attach PostgreSQL: {e}")))?;
    Ok(())
}

/// Wrap a Postgres statement so DuckDB sends it to the server untouched
fn pushdown(pg_sql: &str) -> String {
    format!(
        "SELECT * FROM postgres_query('{SOURCE_ALIAS}', {})",
        quote_literal(pg_sql)
    )
}

/// Chunk SQL producing one JSON text column
fn as_json_text(query: &ChunkQuery) -> String {
    match query.projection {
        Projection::JsonText => query.sql.clone(),
        Projection::Columns => format!("SELECT row_to_json(q)::text FROM ({}) AS q", query.sql),
    }
}

fn filenode_sql(stream: &StreamDescriptor) -> String {
    // to_regclass yields NULL for a missing relation instead of failing
    format!(
        "SELECT pg_relation_filenode(to_regclass({}))::bigint",
        quote_literal(&stream.quoted_table_name())
    )
}

fn relation_size_sql(stream: &StreamDescriptor) -> String {
    format!(
        "SELECT pg_relation_size({}::regclass)::bigint",
        quote_literal(&stream.quoted_table_name())
    )
}

fn parse_object(stream: &str, text: &str) -> Result<JsonObject> {
    match serde_json::from_str::<JsonValue>(text)? {
        JsonValue::Object(object) => Ok(object),
        other => Err(Error::query(
            stream,
            format!("expected a JSON object row, got {other}"),
        )),
    }
}

async fn write_bytes(sink: &mut (dyn AsyncWrite + Unpin + Send), bytes: Bytes) -> Result<u64> {
    sink.write_all(&bytes).await?;
    Ok(bytes.len() as u64)
}

fn redact(connection_string: &str) -> String {
    URL_PASSWORD
        .replace(connection_string, "://$1:***@")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctid::{ChunkRange, Ctid, ScanMode};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pushdown_escapes_quotes() {
        let sql = pushdown("SELECT 'a'::text");
        assert_eq!(
            sql,
            "SELECT * FROM postgres_query('source_db', 'SELECT ''a''::text')"
        );
    }

    #[test]
    fn test_probe_sql_quotes_relation() {
        let stream = StreamDescriptor::new("Sales", "o'rders");
        assert_eq!(
            filenode_sql(&stream),
            "SELECT pg_relation_filenode(to_regclass('\"Sales\".\"o''rders\"'))::bigint"
        );
        assert!(relation_size_sql(&stream).contains("::regclass"));
    }

    #[test]
    fn test_columns_projection_serialized_as_json() {
        let stream = StreamDescriptor::new("public", "users");
        let range = ChunkRange::bounded(Ctid::ZERO, Ctid::new(4, 0));
        let columns = ChunkQuery::new(&stream, &[], range, 0, ScanMode::TidRange, Projection::Columns);
        let json = ChunkQuery::new(&stream, &[], range, 0, ScanMode::TidRange, Projection::JsonText);

        assert!(as_json_text(&columns).starts_with("SELECT row_to_json(q)::text FROM (SELECT "));
        assert_eq!(as_json_text(&json), json.sql);
    }

    #[test]
    fn test_parse_object_rejects_scalars() {
        assert_eq!(
            parse_object("public.users", r#"{"id": 1}"#).unwrap()["id"],
            serde_json::json!(1)
        );
        assert!(matches!(
            parse_object("public.users", "42"),
            Err(Error::Query { .. })
        ));
    }

    #[test]
    fn test_redact_password() {
        assert_eq!(
            redact("postgresql://app:s3cret@db:5432/prod?sslmode=require"),
            "postgresql://app:***@db:5432/prod?sslmode=require"
        );
        assert_eq!(redact("postgresql://db/prod"), "postgresql://db/prod");
    }
}
