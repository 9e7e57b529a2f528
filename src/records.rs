// 🧾 Record streaming shared by the normalizer and the loader
// Semicolon-delimited, quote-aware, read as raw bytes in bounded batches

use crate::error::{EtlError, Result};
use csv::{ByteRecord, Reader, ReaderBuilder, Writer, WriterBuilder};
use encoding_rs::Encoding;
use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const DELIMITER: u8 = b';';

/// Reader for publisher files; the header (if any) is handled by the caller
pub fn source_reader<R: Read>(inner: R) -> Reader<R> {
    ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(inner)
}

pub fn source_writer<W: Write>(inner: W) -> Writer<W> {
    WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_writer(inner)
}

/// Line number of a record for diagnostics (1-based)
pub fn record_line(record: &ByteRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

/// True when `record` spells out exactly `columns`
pub fn is_header(record: &ByteRecord, columns: &[&str]) -> bool {
    record.len() == columns.len()
        && record
            .iter()
            .zip(columns)
            .all(|(field, column)| field == column.as_bytes())
}

// ============================================================================
// BATCHES
// ============================================================================

/// RecordBatches - fixed-schema records in batches of at most `batch_size`.
///
/// Every record is checked against the expected field count; the first
/// mismatch ends the stream with `SchemaMismatch`.
pub struct RecordBatches<R: Read> {
    reader: Reader<R>,
    source: PathBuf,
    expected: usize,
    batch_size: usize,
    done: bool,
}

impl<R: Read> RecordBatches<R> {
    pub fn new(reader: Reader<R>, source: &Path, expected: usize, batch_size: usize) -> Self {
        RecordBatches {
            reader,
            source: source.to_path_buf(),
            expected,
            batch_size: batch_size.max(1),
            done: false,
        }
    }

    fn next_batch(&mut self) -> Result<Vec<ByteRecord>> {
        let mut batch = Vec::with_capacity(self.batch_size.min(4096));
        let mut record = ByteRecord::new();

        while batch.len() < self.batch_size {
            if !self.reader.read_byte_record(&mut record)? {
                self.done = true;
                break;
            }
            if record.len() != self.expected {
                return Err(EtlError::SchemaMismatch {
                    path: self.source.clone(),
                    line: record_line(&record),
                    expected: self.expected,
                    found: record.len(),
                });
            }
            batch.push(record.clone());
        }

        Ok(batch)
    }
}

impl<R: Read> Iterator for RecordBatches<R> {
    type Item = Result<Vec<ByteRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(batch) if batch.is_empty() => None,
            Ok(batch) => Some(Ok(batch)),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// Labels decoded as ISO-8859-1 proper (every byte is the code point of
/// the same value). WHATWG maps these labels to windows-1252, which reads
/// 0x80-0x9F as punctuation instead of C1 controls.
const ISO_8859_1_LABELS: &[&str] = &["latin1", "latin-1", "iso-8859-1", "iso8859-1", "iso_8859-1", "l1"];

/// Character set of the publisher files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    /// Byte-to-char mapping, never fails
    Latin1,
    /// Any other label known to encoding_rs
    Whatwg(&'static Encoding),
}

impl SourceEncoding {
    pub fn for_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        if ISO_8859_1_LABELS.contains(&label.as_str()) {
            return Some(SourceEncoding::Latin1);
        }
        Encoding::for_label(label.as_bytes()).map(SourceEncoding::Whatwg)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceEncoding::Latin1 => "ISO-8859-1",
            SourceEncoding::Whatwg(encoding) => encoding.name(),
        }
    }

    /// Decode one field, or None when the bytes are malformed
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        match self {
            SourceEncoding::Latin1 => Some(encoding_rs::mem::decode_latin1(bytes)),
            SourceEncoding::Whatwg(encoding) => {
                encoding.decode_without_bom_handling_and_without_replacement(bytes)
            }
        }
    }
}

/// Check every field of `record` decodes under `encoding`
pub fn check_decodable(record: &ByteRecord, encoding: SourceEncoding, source: &Path) -> Result<()> {
    for field in record.iter() {
        if encoding.decode(field).is_none() {
            return Err(decode_error(record, encoding, source));
        }
    }
    Ok(())
}

/// Decode a record to text; empty fields become `None` (SQL NULL)
pub fn decode_record(
    record: &ByteRecord,
    encoding: SourceEncoding,
    source: &Path,
) -> Result<Vec<Option<String>>> {
    record
        .iter()
        .map(|field| {
            if field.is_empty() {
                return Ok(None);
            }
            encoding
                .decode(field)
                .map(|text| Some(text.into_owned()))
                .ok_or_else(|| decode_error(record, encoding, source))
        })
        .collect()
}

fn decode_error(record: &ByteRecord, encoding: SourceEncoding, source: &Path) -> EtlError {
    EtlError::Decode {
        path: source.to_path_buf(),
        line: record_line(record),
        encoding: encoding.name(),
    }
}
