// ⚠️ Error taxonomy for the load pipeline
// Every variant is fatal for the run; nothing in the core retries or skips.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    // ------------------------------------------------------------------------
    // (a) acquisition
    // ------------------------------------------------------------------------
    #[error("transfer of {url} failed: {message}")]
    Transport { url: String, message: String },

    // ------------------------------------------------------------------------
    // (b) archives
    // ------------------------------------------------------------------------
    #[error(
        "corrupt archive {path}: not a valid ZIP file ({reason}). \
         Check whether the download completed"
    )]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("archive member {member} in {path} would escape the extraction directory")]
    UnsafeMember { path: PathBuf, member: String },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    // ------------------------------------------------------------------------
    // (c) normalization / decoding
    // ------------------------------------------------------------------------
    #[error("{path}:{line}: expected {expected} fields, found {found}")]
    SchemaMismatch {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("{path}: header row does not match the {table} column schema")]
    HeaderMismatch { path: PathBuf, table: String },

    #[error("{path} already carries a header row; refusing to normalize it twice")]
    AlreadyNormalized { path: PathBuf },

    #[error("{path}:{line}: field is not valid {encoding}")]
    Decode {
        path: PathBuf,
        line: u64,
        encoding: &'static str,
    },

    #[error("{path}:{line}: empty base identifier")]
    MissingBaseIdentifier { path: PathBuf, line: u64 },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // ------------------------------------------------------------------------
    // (d) store
    // ------------------------------------------------------------------------
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(
        "{orphans} establishment rows reference a base identifier with no entity row \
         (first: {sample:?})"
    )]
    IntegrityViolation { orphans: i64, sample: Vec<String> },

    // ------------------------------------------------------------------------
    // (e) export
    // ------------------------------------------------------------------------
    #[error("dimension table {0} is missing from the store; load it before exporting")]
    MissingDimension(String),

    // ------------------------------------------------------------------------
    // ambient
    // ------------------------------------------------------------------------
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EtlError>;

impl EtlError {
    /// Process exit code for the binary, grouped by taxonomy entry.
    pub fn exit_code(&self) -> i32 {
        match self {
            EtlError::Config(_) => 2,
            EtlError::Transport { .. } => 3,
            EtlError::CorruptArchive { .. } | EtlError::UnsafeMember { .. } | EtlError::Archive(_) => 4,
            EtlError::SchemaMismatch { .. }
            | EtlError::HeaderMismatch { .. }
            | EtlError::AlreadyNormalized { .. }
            | EtlError::Decode { .. }
            | EtlError::MissingBaseIdentifier { .. }
            | EtlError::Csv(_) => 5,
            EtlError::Store(_) | EtlError::IntegrityViolation { .. } => 6,
            EtlError::MissingDimension(_) => 7,
            EtlError::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_archive_message_points_at_download() {
        let err = EtlError::CorruptArchive {
            path: PathBuf::from("data/downloads/empresas/Empresas0.zip"),
            reason: "invalid Zip archive".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("corrupt archive"));
        assert!(msg.contains("Empresas0.zip"));
        assert!(msg.contains("download"));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_exit_codes_follow_taxonomy() {
        let transport = EtlError::Transport {
            url: "https://example.org/a.zip".to_string(),
            message: "timed out".to_string(),
        };
        let mismatch = EtlError::SchemaMismatch {
            path: PathBuf::from("x.csv"),
            line: 3,
            expected: 7,
            found: 6,
        };
        assert_eq!(transport.exit_code(), 3);
        assert_eq!(mismatch.exit_code(), 5);
        assert_eq!(EtlError::MissingDimension("cnae".into()).exit_code(), 7);
    }
}
