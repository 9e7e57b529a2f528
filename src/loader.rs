// 🚚 Bulk Loader
// Normalized files or archive members → table rows, one transaction per batch

use crate::archive::{member_unreadable, open_archive};
use crate::dataset::DatasetKind;
use crate::db;
use crate::error::{EtlError, Result};
use crate::records::{decode_record, is_header, source_reader, RecordBatches, SourceEncoding};
use csv::{ByteRecord, Reader};
use rusqlite::Connection;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

/// Rows appended to one table during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub table: &'static str,
    pub files: usize,
    pub rows: u64,
    pub batches: u64,
}

impl LoadSummary {
    fn new(kind: DatasetKind) -> Self {
        LoadSummary {
            table: kind.table(),
            files: 0,
            rows: 0,
            batches: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub entities: LoadSummary,
    pub establishments: LoadSummary,
}

/// BulkLoader - the staging phase of the two-table load.
///
/// Creating the loader suspends foreign-key enforcement; `finish` restores
/// it once every file for both tables has been appended. The tables can
/// therefore be filled in either order.
pub struct BulkLoader<'c> {
    conn: &'c mut Connection,
    batch_size: usize,
    encoding: SourceEncoding,
    entities: LoadSummary,
    establishments: LoadSummary,
}

impl<'c> BulkLoader<'c> {
    pub fn begin(
        conn: &'c mut Connection,
        batch_size: usize,
        encoding: SourceEncoding,
    ) -> Result<Self> {
        db::suspend_integrity(conn)?;
        Ok(BulkLoader {
            conn,
            batch_size,
            encoding,
            entities: LoadSummary::new(DatasetKind::Entities),
            establishments: LoadSummary::new(DatasetKind::Establishments),
        })
    }

    /// Load a normalized file; its header row must match the table schema
    pub fn load_normalized_file(&mut self, kind: DatasetKind, path: &Path) -> Result<u64> {
        let mut reader = source_reader(BufReader::new(File::open(path)?));

        let mut header = ByteRecord::new();
        if !reader.read_byte_record(&mut header)? || !is_header(&header, kind.columns()) {
            return Err(EtlError::HeaderMismatch {
                path: path.to_path_buf(),
                table: kind.table().to_string(),
            });
        }

        let rows = self.load_records(kind, reader, path)?;
        self.summary_mut(kind).files += 1;
        info!("Loaded {} rows into {} from {}", rows, kind, path.display());
        Ok(rows)
    }

    /// Load every `kind` member of an archive straight from the ZIP stream.
    ///
    /// Members are headerless; the schema is attached per batch and no
    /// intermediate file is written.
    pub fn load_archive(&mut self, kind: DatasetKind, archive_path: &Path) -> Result<u64> {
        let mut archive = open_archive(archive_path)?;
        let mut total = 0;

        for index in 0..archive.len() {
            let mut member = archive.by_index(index)?;
            if !kind.is_member(member.name()) {
                continue;
            }
            let name = member.name().to_string();
            let source = archive_path.join(&name);

            let reader = source_reader(BufReader::new(&mut member));
            let rows = self
                .load_records(kind, reader, &source)
                .map_err(|err| match err {
                    // the only reader underneath is the member stream
                    EtlError::Csv(e) if e.is_io_error() => {
                        member_unreadable(archive_path, &name, e)
                    }
                    other => other,
                })?;
            self.summary_mut(kind).files += 1;
            info!("Loaded {} rows into {} from {}", rows, kind, source.display());
            total += rows;
        }

        Ok(total)
    }

    fn load_records<R: Read>(
        &mut self,
        kind: DatasetKind,
        reader: Reader<R>,
        source: &Path,
    ) -> Result<u64> {
        let batches = RecordBatches::new(reader, source, kind.columns().len(), self.batch_size);
        let mut loaded = 0u64;

        for batch in batches {
            let batch = batch?;
            let rows = batch
                .iter()
                .map(|record| {
                    let row = decode_record(record, self.encoding, source)?;
                    if row[0].is_none() {
                        return Err(EtlError::MissingBaseIdentifier {
                            path: source.to_path_buf(),
                            line: crate::records::record_line(record),
                        });
                    }
                    Ok(row)
                })
                .collect::<Result<Vec<_>>>()?;

            db::insert_batch(self.conn, kind, &rows)?;
            loaded += rows.len() as u64;

            let summary = self.summary_mut(kind);
            summary.rows += rows.len() as u64;
            summary.batches += 1;
            debug!("{}: batch of {} rows ({} total)", kind, rows.len(), summary.rows);
        }

        Ok(loaded)
    }

    fn summary_mut(&mut self, kind: DatasetKind) -> &mut LoadSummary {
        match kind {
            DatasetKind::Entities => &mut self.entities,
            DatasetKind::Establishments => &mut self.establishments,
        }
    }

    /// End the staging phase and restore enforcement
    pub fn finish(self) -> Result<LoadOutcome> {
        db::restore_integrity(self.conn)?;
        Ok(LoadOutcome {
            entities: self.entities,
            establishments: self.establishments,
        })
    }
}
