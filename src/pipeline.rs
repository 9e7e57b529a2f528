// 🔁 Pipeline - Acquisition → Materialization → Normalization → Bulk Load
//               → Index Build → Integrity Check → Projection Export

use crate::acquire::{acquire, read_manifest, AcquisitionReport, Fetcher};
use crate::archive::{extract_archive, mark_ready};
use crate::config::{IntegrityPolicy, LoadMode, PipelineConfig};
use crate::dataset::DatasetKind;
use crate::db::{self, IntegrityReport};
use crate::error::{EtlError, Result};
use crate::export::{export_projection, query_projection, ExportSummary, ProjectionRow, CONSTRUCTION_SERVICES_V1};
use crate::loader::{BulkLoader, LoadOutcome};
use crate::normalize::normalize_file;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Acquisition counts for one dataset kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionCounts {
    pub table: &'static str,
    pub archives: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub ignored: usize,
    pub bytes: u64,
}

impl AcquisitionCounts {
    fn from_report(kind: DatasetKind, report: &AcquisitionReport) -> Self {
        AcquisitionCounts {
            table: kind.table(),
            archives: report.archives.len(),
            fetched: report.fetched,
            skipped: report.skipped,
            ignored: report.ignored.len(),
            bytes: report.bytes,
        }
    }
}

/// Everything a run did, written next to the export as JSON
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub load_mode: LoadMode,
    pub acquisition: Vec<AcquisitionCounts>,
    /// Rows rewritten by the normalizer (0 in streaming mode)
    pub normalized_rows: u64,
    pub load: LoadOutcome,
    pub integrity: IntegrityReport,
    pub export: ExportSummary,
}

/// Files the loader will read for one kind
struct StagedSource {
    kind: DatasetKind,
    files: Vec<PathBuf>,
}

pub struct Pipeline<F: Fetcher> {
    config: PipelineConfig,
    fetcher: F,
}

impl<F: Fetcher> Pipeline<F> {
    pub fn new(config: PipelineConfig, fetcher: F) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline { config, fetcher })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Full rebuild: both tables are dropped and reloaded from the manifests
    pub fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let config = &self.config;
        let encoding = config.encoding()?;
        info!("Run {} started ({:?} mode)", run_id, config.load_mode);

        config.ensure_workspace()?;
        let mut conn = db::open_store(&config.database)?;
        db::recreate_tables(&conn)?;

        // 1-3. acquisition, materialization, normalization (per kind)
        let mut acquisition = Vec::new();
        let mut staged = Vec::new();
        let mut normalized_rows = 0u64;
        for kind in DatasetKind::ALL {
            let urls = read_manifest(&config.manifest_path(kind))?;
            let report = acquire(&self.fetcher, &urls, &config.download_dir(kind), &config.http)?;
            acquisition.push(AcquisitionCounts::from_report(kind, &report));

            let files = match config.load_mode {
                LoadMode::Streaming => report.archives,
                LoadMode::Materialized => {
                    let (files, rows) = self.materialize(kind, &report.archives)?;
                    normalized_rows += rows;
                    files
                }
            };
            staged.push(StagedSource { kind, files });
        }

        // 4. bulk load with integrity suspended
        let mut loader = BulkLoader::begin(&mut conn, config.batch_size, encoding)?;
        for source in &staged {
            for file in &source.files {
                match config.load_mode {
                    LoadMode::Materialized => loader.load_normalized_file(source.kind, file)?,
                    LoadMode::Streaming => loader.load_archive(source.kind, file)?,
                };
            }
        }
        let load = loader.finish()?;
        info!(
            "Loaded {} entity rows and {} establishment rows",
            load.entities.rows, load.establishments.rows
        );

        // 5. indexes, then the one-shot referential check
        db::create_indexes(&conn)?;
        let integrity = db::validate_integrity(&conn)?;
        if !integrity.is_clean() {
            match config.integrity {
                IntegrityPolicy::Enforce => {
                    return Err(EtlError::IntegrityViolation {
                        orphans: integrity.orphans,
                        sample: integrity.sample,
                    })
                }
                IntegrityPolicy::Warn => warn!(
                    "{} establishment rows have no entity row (first: {:?})",
                    integrity.orphans, integrity.sample
                ),
            }
        }

        // 6. projection
        let export = export_projection(&conn, &CONSTRUCTION_SERVICES_V1, &config.export_path)?;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            load_mode: config.load_mode,
            acquisition,
            normalized_rows,
            load,
            integrity,
            export,
        };
        write_report(&report, &config.report_path)?;
        info!("Run {} finished", run_id);
        Ok(report)
    }

    /// Extract every archive, mark the recognized members ready and
    /// normalize them. Returns the ready files and the rows normalized.
    fn materialize(&self, kind: DatasetKind, archives: &[PathBuf]) -> Result<(Vec<PathBuf>, u64)> {
        let config = &self.config;
        let extract_dir = config.extract_dir(kind);
        let encoding = config.encoding()?;

        for archive in archives {
            extract_archive(archive, &extract_dir)?;
        }

        let ready = mark_ready(&extract_dir, kind)?;
        let mut rows = 0;
        for file in &ready {
            rows += normalize_file(file, kind.columns(), config.batch_size, encoding)?.rows;
        }
        Ok((ready, rows))
    }
}

/// Re-run the projection against an already loaded store
pub fn export_only(config: &PipelineConfig) -> Result<ExportSummary> {
    let conn = db::open_store(&config.database)?;
    export_projection(&conn, &CONSTRUCTION_SERVICES_V1, &config.export_path)
}

/// Projection rows for one base identifier
pub fn lookup(config: &PipelineConfig, base_identifier: &str) -> Result<Vec<ProjectionRow>> {
    let conn = db::open_store(&config.database)?;
    query_projection(&conn, &CONSTRUCTION_SERVICES_V1, Some(base_identifier))
}

pub fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).map_err(|e| EtlError::Io(e.into()))?;
    std::fs::write(path, json)?;
    Ok(())
}
