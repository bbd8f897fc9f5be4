//! PostgreSQL binary COPY framing
//!
//! Layout:
//! - 11-byte signature `PGCOPY\n\xff\r\n\0`
//! - i32 flags (bit 16: each tuple carries an OID field)
//! - i32 header extension length, followed by that many bytes
//! - per tuple: i16 field count (`-1` is the trailer), then per field an
//!   i32 length (`-1` is NULL) and the field bytes
//!
//! The reader only accepts single-column tuples: the bulk export projects
//! every row into one JSON text column.

use super::types::NullFieldPolicy;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use tempfile::{NamedTempFile, TempPath};

/// File signature of the binary COPY format
pub const COPY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

const FLAG_HAS_OIDS: i32 = 1 << 16;
const TRAILER: i16 = -1;
const NULL_LENGTH: i32 = -1;

/// Pull-based reader over a single-column binary COPY stream
pub struct CopyBinaryReader<R: Read> {
    reader: BufReader<R>,
    has_oids: bool,
    null_policy: NullFieldPolicy,
    peeked: Option<Option<String>>,
    done: bool,
    rows_read: u64,
    /// Spool file removed when the reader is closed or dropped
    temp_path: Option<TempPath>,
}

impl<R: Read> std::fmt::Debug for CopyBinaryReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyBinaryReader")
            .field("has_oids", &self.has_oids)
            .field("null_policy", &self.null_policy)
            .field("done", &self.done)
            .field("rows_read", &self.rows_read)
            .field("temp_path", &self.temp_path)
            .finish_non_exhaustive()
    }
}

impl<R: Read> CopyBinaryReader<R> {
    /// Read and validate the header. Fails on a truncated or foreign header.
    pub fn new(reader: R, null_policy: NullFieldPolicy) -> Result<Self> {
        let mut reader = BufReader::new(reader);

        let mut signature = [0u8; 11];
        read_exact(&mut reader, &mut signature, "signature")?;
        if &signature != COPY_SIGNATURE {
            return Err(Error::format("missing PGCOPY signature"));
        }

        let flags = read_i32(&mut reader, "header flags")?;
        let extension_len = read_i32(&mut reader, "header extension length")?;
        if extension_len < 0 {
            return Err(Error::format(format!(
                "negative header extension length {extension_len}"
            )));
        }
        let skipped = std::io::copy(
            &mut (&mut reader).take(extension_len as u64),
            &mut std::io::sink(),
        )?;
        if skipped != extension_len as u64 {
            return Err(Error::eof("header extension"));
        }

        Ok(Self {
            reader,
            has_oids: flags & FLAG_HAS_OIDS != 0,
            null_policy,
            peeked: None,
            done: false,
            rows_read: 0,
            temp_path: None,
        })
    }

    /// Whether another row is available. Reads ahead one row.
    pub fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        if self.done {
            return Ok(false);
        }
        match self.read_row() {
            Ok(Some(value)) => {
                self.peeked = Some(value);
                Ok(true)
            }
            Ok(None) => {
                self.done = true;
                Ok(false)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    /// Next row's text payload; `None` inside means SQL NULL
    pub fn next_row(&mut self) -> Result<Option<Option<String>>> {
        if !self.has_next()? {
            return Ok(None);
        }
        Ok(self.peeked.take())
    }

    /// Rows returned so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Release the source and delete any owned spool file
    pub fn close(mut self) -> Result<()> {
        if let Some(path) = self.temp_path.take() {
            path.close()?;
        }
        Ok(())
    }

    fn read_row(&mut self) -> Result<Option<Option<String>>> {
        let field_count = match read_i16(&mut self.reader, "field count") {
            Ok(count) => count,
            Err(Error::UnexpectedEof { .. }) => {
                return Err(Error::eof("stream ended without a trailer"));
            }
            Err(e) => return Err(e),
        };
        if field_count == TRAILER {
            return Ok(None);
        }

        if self.has_oids {
            // The OID field is not part of the field count
            self.read_field()?;
        }
        if field_count != 1 {
            return Err(Error::format(format!(
                "expected 1 field per row, found {field_count}"
            )));
        }

        let value = match self.read_field()? {
            Some(bytes) => Some(
                String::from_utf8(bytes)
                    .map_err(|e| Error::decode(format!("row is not valid UTF-8: {e}")))?,
            ),
            None => match self.null_policy {
                NullFieldPolicy::Null => None,
                NullFieldPolicy::Error => {
                    return Err(Error::eof(format!(
                        "field length -1 at row {}",
                        self.rows_read + 1
                    )))
                }
            },
        };
        self.rows_read += 1;
        Ok(Some(value))
    }

    fn read_field(&mut self) -> Result<Option<Vec<u8>>> {
        let len = read_i32(&mut self.reader, "field length")?;
        if len == NULL_LENGTH {
            return Ok(None);
        }
        if len < 0 {
            return Err(Error::format(format!("invalid field length {len}")));
        }
        let mut buf = vec![0u8; len as usize];
        read_exact(&mut self.reader, &mut buf, "field data")?;
        Ok(Some(buf))
    }
}

impl CopyBinaryReader<File> {
    /// Read a spooled export from its start; the file is deleted when the
    /// reader goes away
    pub fn from_temp_file(file: NamedTempFile, null_policy: NullFieldPolicy) -> Result<Self> {
        let (mut file, path) = file.into_parts();
        file.seek(SeekFrom::Start(0))?;
        let mut reader = Self::new(file, null_policy)?;
        reader.temp_path = Some(path);
        Ok(reader)
    }
}

impl<R: Read> Iterator for CopyBinaryReader<R> {
    type Item = Result<Option<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::eof(what.to_string())
        } else {
            Error::Io(e)
        }
    })
}

fn read_i16<R: Read>(reader: &mut R, what: &str) -> Result<i16> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf, what)?;
    Ok(i16::from_be_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R, what: &str) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(i32::from_be_bytes(buf))
}

/// Encoder for single-column binary COPY streams
#[derive(Debug)]
pub struct CopyBinaryWriter {
    buf: BytesMut,
}

impl Default for CopyBinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyBinaryWriter {
    /// Start a stream with the standard header and no OIDs
    pub fn new() -> Self {
        let mut buf = BytesMut::with_capacity(64 * 1024);
        buf.extend_from_slice(COPY_SIGNATURE);
        buf.put_i32(0); // Flags: no OIDs
        buf.put_i32(0); // Header extension length: 0
        Self { buf }
    }

    /// Append a one-field row
    pub fn write_text(&mut self, value: Option<&str>) {
        self.buf.put_i16(1);
        match value {
            Some(text) => {
                self.buf.put_i32(text.len() as i32);
                self.buf.extend_from_slice(text.as_bytes());
            }
            None => self.buf.put_i32(NULL_LENGTH),
        }
    }

    /// Bytes buffered so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the buffered bytes, leaving the writer ready for more rows
    pub fn split(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Append the trailer and return the remaining bytes
    pub fn finish(mut self) -> Bytes {
        self.buf.put_i16(TRAILER);
        self.buf.freeze()
    }
}
