// ⚙️ Pipeline configuration
// One structure passed into every component instead of module-level constants

use crate::dataset::DatasetKind;
use crate::error::{EtlError, Result};
use crate::records::SourceEncoding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of records per normalize/load batch
pub const DEFAULT_BATCH_SIZE: usize = 25_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Extract, rename, normalize in place, then load the normalized files
    Materialized,
    /// Load recognized members straight from the ZIP stream
    Streaming,
}

impl std::str::FromStr for LoadMode {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "materialized" => Ok(LoadMode::Materialized),
            "streaming" => Ok(LoadMode::Streaming),
            other => Err(EtlError::Config(format!(
                "unknown load mode '{}' (expected materialized or streaming)",
                other
            ))),
        }
    }
}

/// What to do when staged establishments reference a missing entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityPolicy {
    Enforce,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout; archives are large so this is generous
    pub timeout_secs: u64,
    /// 0 keeps the single-attempt behavior
    pub retries: u32,
    pub retry_backoff_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("cnpj-etl/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_secs: 30,
            timeout_secs: 240,
            retries: 0,
            retry_backoff_secs: 5,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the working tree (manifests, downloads, extracted files)
    pub data_dir: PathBuf,
    /// SQLite file; relative paths are taken as-is
    pub database: PathBuf,
    pub export_path: PathBuf,
    pub report_path: PathBuf,
    pub batch_size: usize,
    /// "latin1" (ISO-8859-1) or any label understood by encoding_rs
    pub source_encoding: String,
    pub load_mode: LoadMode,
    pub integrity: IntegrityPolicy,
    pub http: HttpConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_data_dir("data")
    }
}

impl PipelineConfig {
    /// Defaults with every path rooted at `data_dir`
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            database: data_dir.join("cnpj.db"),
            export_path: data_dir.join("resultado_final.csv"),
            report_path: data_dir.join("run_report.json"),
            data_dir,
            batch_size: DEFAULT_BATCH_SIZE,
            source_encoding: "latin1".to_string(),
            load_mode: LoadMode::Materialized,
            integrity: IntegrityPolicy::Enforce,
            http: HttpConfig::default(),
        }
    }

    pub fn manifest_path(&self, kind: DatasetKind) -> PathBuf {
        self.data_dir.join(kind.manifest_name())
    }

    pub fn download_dir(&self, kind: DatasetKind) -> PathBuf {
        self.data_dir.join("downloads").join(kind.table())
    }

    pub fn extract_dir(&self, kind: DatasetKind) -> PathBuf {
        self.data_dir.join("csv").join(kind.table())
    }

    /// Resolve the configured source encoding
    pub fn encoding(&self) -> Result<SourceEncoding> {
        SourceEncoding::for_label(&self.source_encoding).ok_or_else(|| {
            EtlError::Config(format!("unknown source encoding '{}'", self.source_encoding))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EtlError::Config("batch_size must be at least 1".to_string()));
        }
        self.encoding()?;
        Ok(())
    }

    /// Create the download and extraction directories for both kinds
    pub fn ensure_workspace(&self) -> Result<()> {
        for kind in DatasetKind::ALL {
            std::fs::create_dir_all(self.download_dir(kind))?;
            std::fs::create_dir_all(self.extract_dir(kind))?;
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: PipelineConfig = toml::from_str(&contents)
        .map_err(|e| EtlError::Config(format!("Failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

pub fn to_toml(config: &PipelineConfig) -> Result<String> {
    toml::to_string_pretty(config)
        .map_err(|e| EtlError::Config(format!("Failed to serialize config: {}", e)))
}
