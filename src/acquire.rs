// 📥 Source Acquisition
// Manifest of archive URLs → local files, skipping anything already on disk

use crate::config::HttpConfig;
use crate::error::{EtlError, Result};
use crate::progress::TransferProgress;
use reqwest::blocking::Client;
use reqwest::Url;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ARCHIVE_EXTENSION: &str = ".zip";
const TRANSFER_CHUNK: usize = 1024 * 1024;

// ============================================================================
// MANIFEST
// ============================================================================

/// Read a manifest: one URL per line, blank lines ignored
pub fn read_manifest(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Local file name for an archive URL, or None when the URL does not name a ZIP
pub fn archive_file_name(url: &str) -> Option<String> {
    let name = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)?,
        Err(_) => url.rsplit('/').next()?.to_string(),
    };

    if name.ends_with(ARCHIVE_EXTENSION) {
        Some(name)
    } else {
        None
    }
}

// ============================================================================
// FETCHER
// ============================================================================

/// Fetcher - the transfer collaborator
///
/// Implementations write the resource behind `url` to `dest` (creating or
/// truncating it) and return the number of bytes written. Any failure is
/// reported as `EtlError::Transport`.
pub trait Fetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Blocking HTTP fetcher with a byte-level progress bar
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(http.user_agent.clone())
            .connect_timeout(http.connect_timeout())
            .timeout(http.timeout())
            .build()
            .map_err(|e| EtlError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(HttpFetcher { client })
    }
}

fn transport(url: &str, err: impl std::fmt::Display) -> EtlError {
    EtlError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| transport(url, e))?;

        let label = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());
        let mut progress =
            TransferProgress::new(&format!("Downloading {}", label), response.content_length());

        let mut file = BufWriter::new(File::create(dest)?);
        let mut buffer = vec![0u8; TRANSFER_CHUNK];
        loop {
            let read = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    progress.abandon("transfer failed");
                    return Err(transport(url, e));
                }
            };
            file.write_all(&buffer[..read])?;
            progress.advance(read as u64);
        }
        file.flush()?;
        progress.finish();

        Ok(progress.transferred())
    }
}

// ============================================================================
// ACQUISITION
// ============================================================================

/// Outcome for a single archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    AlreadyPresent,
    Fetched { bytes: u64 },
}

#[derive(Debug, Default, Clone)]
pub struct AcquisitionReport {
    /// Every archive now on disk, in manifest order
    pub archives: Vec<PathBuf>,
    pub fetched: usize,
    pub skipped: usize,
    /// Manifest entries that do not name a ZIP archive
    pub ignored: Vec<String>,
    pub bytes: u64,
}

/// Make sure `dest` exists, fetching it through a `.part` file when absent
pub fn ensure_archive<F: Fetcher + ?Sized>(
    fetcher: &F,
    url: &str,
    dest: &Path,
    http: &HttpConfig,
) -> Result<Acquired> {
    if dest.exists() {
        info!("Archive already present: {}", dest.display());
        return Ok(Acquired::AlreadyPresent);
    }

    let partial = partial_path(dest);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        debug!("Fetching {} (attempt {})", url, attempt);

        match fetcher.fetch(url, &partial) {
            Ok(bytes) => {
                fs::rename(&partial, dest)?;
                info!("Fetched {} ({} bytes)", dest.display(), bytes);
                return Ok(Acquired::Fetched { bytes });
            }
            Err(err) => {
                let _ = fs::remove_file(&partial);
                if attempt > http.retries {
                    return Err(err);
                }
                warn!(
                    "Transfer of {} failed ({}); retrying in {}s",
                    url, err, http.retry_backoff_secs
                );
                std::thread::sleep(http.retry_backoff());
            }
        }
    }
}

/// Acquire every archive URL into `dest_dir`
pub fn acquire<F: Fetcher + ?Sized>(
    fetcher: &F,
    urls: &[String],
    dest_dir: &Path,
    http: &HttpConfig,
) -> Result<AcquisitionReport> {
    fs::create_dir_all(dest_dir)?;
    let mut report = AcquisitionReport::default();

    for url in urls {
        let Some(name) = archive_file_name(url) else {
            debug!("Skipping non-archive manifest entry: {}", url);
            report.ignored.push(url.clone());
            continue;
        };

        let dest = dest_dir.join(&name);
        match ensure_archive(fetcher, url, &dest, http)? {
            Acquired::AlreadyPresent => report.skipped += 1,
            Acquired::Fetched { bytes } => {
                report.fetched += 1;
                report.bytes += bytes;
            }
        }
        report.archives.push(dest);
    }

    Ok(report)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
