// 🧱 Schema Normalizer
// Headerless publisher file → same file with the column header injected

use crate::error::{EtlError, Result};
use crate::records::{
    check_decodable, is_header, source_reader, source_writer, RecordBatches, SourceEncoding,
};
use crate::staging::{commit, staging_file};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NormalizeSummary {
    pub rows: u64,
    pub batches: u64,
}

/// Rewrite `path` in place with `columns` as its header row.
///
/// Records are streamed `batch_size` at a time into a temporary file next
/// to `path`; the temporary file replaces `path` only once every record has
/// been written, so on any error the original is left as it was.
///
/// Field bytes are copied through untouched (no re-encoding, no coercion);
/// each field must still decode under `encoding`.
pub fn normalize_file(
    path: &Path,
    columns: &[&str],
    batch_size: usize,
    encoding: SourceEncoding,
) -> Result<NormalizeSummary> {
    let input = File::open(path)?;
    let batches = RecordBatches::new(
        source_reader(BufReader::new(input)),
        path,
        columns.len(),
        batch_size,
    );

    let temp = staging_file(path, ".normalize-")?;

    let mut summary = NormalizeSummary::default();
    {
        let mut writer = source_writer(BufWriter::new(temp.as_file()));
        writer.write_record(columns)?;

        for batch in batches {
            let batch = batch?;
            if summary.batches == 0 && batch.first().is_some_and(|r| is_header(r, columns)) {
                return Err(EtlError::AlreadyNormalized {
                    path: path.to_path_buf(),
                });
            }

            for record in &batch {
                check_decodable(record, encoding, path)?;
                writer.write_byte_record(record)?;
            }

            summary.rows += batch.len() as u64;
            summary.batches += 1;
            debug!(
                "{}: batch {} ({} rows so far)",
                path.display(),
                summary.batches,
                summary.rows
            );
        }

        writer.flush()?;
    }
    commit(temp, path)?;

    info!(
        "Normalized {} ({} rows, {} batches)",
        path.display(),
        summary.rows,
        summary.batches
    );
    Ok(summary)
}
