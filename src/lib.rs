// CNPJ Registry ETL - Core Library
// Exposes all pipeline stages for use in the CLI and tests

pub mod acquire;    // Manifest URLs → local archives
pub mod archive;    // ZIP extraction + ready marking
pub mod config;
pub mod dataset;    // Table layouts for both dataset kinds
pub mod db;         // SQLite store: schema, batches, indexes, integrity
pub mod error;
pub mod export;     // Filtered projection → resultado_final.csv
pub mod loader;     // Two-phase bulk load
pub mod normalize;  // Header injection, in place
pub mod pipeline;
pub mod progress;
pub mod records;    // Delimited record reading and decoding
pub mod staging;

// Re-export commonly used types
pub use acquire::{acquire, read_manifest, AcquisitionReport, Fetcher, HttpFetcher};
pub use config::{load_config, IntegrityPolicy, LoadMode, PipelineConfig};
pub use dataset::{DatasetKind, ENTITY_COLUMNS, ESTABLISHMENT_COLUMNS};
pub use db::IntegrityReport;
pub use error::{EtlError, Result};
pub use export::{ExportSummary, ProjectionFilter, ProjectionRow, CONSTRUCTION_SERVICES_V1};
pub use loader::{BulkLoader, LoadOutcome, LoadSummary};
pub use records::SourceEncoding;
pub use pipeline::{export_only, lookup, Pipeline, RunReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
