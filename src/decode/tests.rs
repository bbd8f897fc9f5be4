//! Tests for decoder module

use super::*;
use crate::error::Error;
use std::io::{Cursor, Write};

fn encode(rows: &[Option<&str>]) -> Vec<u8> {
    let mut writer = CopyBinaryWriter::new();
    for row in rows {
        writer.write_text(*row);
    }
    writer.finish().to_vec()
}

fn header(flags: i32, extension: &[u8]) -> Vec<u8> {
    let mut bytes = COPY_SIGNATURE.to_vec();
    bytes.extend_from_slice(&flags.to_be_bytes());
    bytes.extend_from_slice(&(extension.len() as i32).to_be_bytes());
    bytes.extend_from_slice(extension);
    bytes
}

fn field(bytes: &mut Vec<u8>, value: &[u8]) {
    bytes.extend_from_slice(&(value.len() as i32).to_be_bytes());
    bytes.extend_from_slice(value);
}

fn collect(bytes: Vec<u8>, policy: NullFieldPolicy) -> crate::Result<Vec<Option<String>>> {
    CopyBinaryReader::new(Cursor::new(bytes), policy)?.collect()
}

// ============================================================================
// Well-formed Streams
// ============================================================================

#[test]
fn test_reads_rows_in_order_then_stops() {
    let bytes = encode(&[Some(r#"{"id":1}"#), Some(r#"{"id":2}"#), Some(r#"{"id":3}"#)]);
    let mut reader = CopyBinaryReader::new(Cursor::new(bytes), NullFieldPolicy::Error).unwrap();

    let mut rows = Vec::new();
    while reader.has_next().unwrap() {
        rows.push(reader.next_row().unwrap().unwrap().unwrap());
    }

    assert_eq!(rows, vec![r#"{"id":1}"#, r#"{"id":2}"#, r#"{"id":3}"#]);
    assert_eq!(reader.rows_read(), 3);
    assert!(!reader.has_next().unwrap());
    assert!(reader.next_row().unwrap().is_none());
}

#[test]
fn test_has_next_is_idempotent() {
    let bytes = encode(&[Some("a")]);
    let mut reader = CopyBinaryReader::new(Cursor::new(bytes), NullFieldPolicy::Error).unwrap();
    assert!(reader.has_next().unwrap());
    assert!(reader.has_next().unwrap());
    assert_eq!(reader.next_row().unwrap(), Some(Some("a".to_string())));
    assert!(!reader.has_next().unwrap());
}

#[test]
fn test_empty_export() {
    let rows = collect(encode(&[]), NullFieldPolicy::Error).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_skips_header_extension() {
    let mut bytes = header(0, b"ignored-extension");
    bytes.extend_from_slice(&1i16.to_be_bytes());
    field(&mut bytes, b"payload");
    bytes.extend_from_slice(&(-1i16).to_be_bytes());

    let rows = collect(bytes, NullFieldPolicy::Error).unwrap();
    assert_eq!(rows, vec![Some("payload".to_string())]);
}

#[test]
fn test_oid_field_is_skipped() {
    let mut bytes = header(1 << 16, &[]);
    bytes.extend_from_slice(&1i16.to_be_bytes());
    field(&mut bytes, &42u32.to_be_bytes()); // oid
    field(&mut bytes, b"with-oid");
    bytes.extend_from_slice(&(-1i16).to_be_bytes());

    let rows = collect(bytes, NullFieldPolicy::Error).unwrap();
    assert_eq!(rows, vec![Some("with-oid".to_string())]);
}

// ============================================================================
// NULL Field Policy
// ============================================================================

#[test]
fn test_null_field_is_eof_error_by_default() {
    let bytes = encode(&[Some("first"), None]);
    let mut reader = CopyBinaryReader::new(Cursor::new(bytes), NullFieldPolicy::Error).unwrap();

    assert_eq!(reader.next().unwrap().unwrap(), Some("first".to_string()));
    assert!(matches!(reader.next(), Some(Err(Error::UnexpectedEof { .. }))));
    // Fused after a failure
    assert!(reader.next().is_none());
}

#[test]
fn test_null_field_decodes_as_null_when_configured() {
    let rows = collect(encode(&[Some("first"), None, Some("third")]), NullFieldPolicy::Null)
        .unwrap();
    assert_eq!(
        rows,
        vec![Some("first".to_string()), None, Some("third".to_string())]
    );
}

// ============================================================================
// Malformed Streams
// ============================================================================

#[test]
fn test_truncated_header_fails() {
    let bytes = encode(&[Some("row")]);
    for cut in [0, 5, 11, 13, 18] {
        let result = CopyBinaryReader::new(Cursor::new(bytes[..cut].to_vec()), NullFieldPolicy::Error);
        assert!(result.is_err(), "header cut at {cut} should fail");
    }
}

#[test]
fn test_bad_signature_fails() {
    let mut bytes = encode(&[Some("row")]);
    bytes[0] = b'X';
    assert!(matches!(
        CopyBinaryReader::new(Cursor::new(bytes), NullFieldPolicy::Error),
        Err(Error::Format { .. })
    ));
}

#[test]
fn test_multi_column_row_is_format_error() {
    let mut bytes = header(0, &[]);
    bytes.extend_from_slice(&2i16.to_be_bytes());
    field(&mut bytes, b"a");
    field(&mut bytes, b"b");
    bytes.extend_from_slice(&(-1i16).to_be_bytes());

    assert!(matches!(
        collect(bytes, NullFieldPolicy::Error),
        Err(Error::Format { .. })
    ));
}

#[test]
fn test_truncated_field_is_eof_error() {
    let mut bytes = encode(&[Some("complete"), Some("truncated-row")]);
    bytes.truncate(bytes.len() - 6);
    let mut reader = CopyBinaryReader::new(Cursor::new(bytes), NullFieldPolicy::Error).unwrap();
    assert!(reader.next().unwrap().is_ok());
    assert!(matches!(reader.next(), Some(Err(Error::UnexpectedEof { .. }))));
}

#[test]
fn test_missing_trailer_is_eof_error() {
    let mut bytes = encode(&[Some("row")]);
    bytes.truncate(bytes.len() - 2);
    let result = collect(bytes, NullFieldPolicy::Error);
    assert!(matches!(result, Err(Error::UnexpectedEof { .. })));
}

#[test]
fn test_invalid_utf8_is_decode_error() {
    let mut bytes = header(0, &[]);
    bytes.extend_from_slice(&1i16.to_be_bytes());
    field(&mut bytes, &[0xff, 0xfe]);
    bytes.extend_from_slice(&(-1i16).to_be_bytes());
    assert!(matches!(
        collect(bytes, NullFieldPolicy::Error),
        Err(Error::Decode { .. })
    ));
}

// ============================================================================
// Spool File Ownership
// ============================================================================

#[test]
fn test_temp_file_deleted_on_close() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&encode(&[Some("x")])).unwrap();
    file.flush().unwrap();
    let path = file.path().to_path_buf();

    let mut reader = CopyBinaryReader::from_temp_file(file, NullFieldPolicy::Error).unwrap();
    assert_eq!(reader.next_row().unwrap(), Some(Some("x".to_string())));
    assert!(path.exists());

    reader.close().unwrap();
    assert!(!path.exists());
}

#[test]
fn test_temp_file_deleted_on_drop() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&encode(&[Some("x"), Some("y")])).unwrap();
    file.flush().unwrap();
    let path = file.path().to_path_buf();

    {
        let _reader = CopyBinaryReader::from_temp_file(file, NullFieldPolicy::Error).unwrap();
    }
    assert!(!path.exists());
}

#[test]
fn test_temp_file_deleted_when_header_invalid() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"not a copy file").unwrap();
    file.flush().unwrap();
    let path = file.path().to_path_buf();

    assert!(CopyBinaryReader::from_temp_file(file, NullFieldPolicy::Error).is_err());
    assert!(!path.exists());
}
