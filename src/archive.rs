// 📦 Archive Materialization
// ZIP archives → member files on disk, recognized members renamed as ready

use crate::dataset::{DatasetKind, READY_SUFFIX};
use crate::error::{EtlError, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::ZipArchive;

pub type Archive = ZipArchive<BufReader<File>>;

const COPY_CHUNK: usize = 64 * 1024;

/// Open an archive, mapping a bad structural signature to `CorruptArchive`
pub fn open_archive(path: &Path) -> Result<Archive> {
    let file = File::open(path)?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| EtlError::CorruptArchive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// A member whose bytes cannot be read back (bad checksum, truncated
/// stream) means the download is damaged even if the directory parsed.
pub fn member_unreadable(
    archive_path: &Path,
    member: &str,
    err: impl std::fmt::Display,
) -> EtlError {
    EtlError::CorruptArchive {
        path: archive_path.to_path_buf(),
        reason: format!("member {} is unreadable: {}", member, err),
    }
}

/// Decompress every member of `archive_path` into `target_dir`.
///
/// Member names are preserved (including sub-directories). Returns the paths
/// of the extracted files in archive order.
pub fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = open_archive(archive_path)?;
    fs::create_dir_all(target_dir)?;

    let mut extracted = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        let relative = member.enclosed_name().ok_or_else(|| EtlError::UnsafeMember {
            path: archive_path.to_path_buf(),
            member: member.name().to_string(),
        })?;
        let out_path = target_dir.join(relative);

        if member.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = BufWriter::new(File::create(&out_path)?);
        let mut buffer = vec![0u8; COPY_CHUNK];
        let mut bytes = 0u64;
        loop {
            // read failures here are CRC or deflate errors, write failures are plain I/O
            let read = member
                .read(&mut buffer)
                .map_err(|e| member_unreadable(archive_path, member.name(), e))?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])?;
            bytes += read as u64;
        }
        out.flush()?;
        debug!("Extracted {} ({} bytes)", out_path.display(), bytes);
        extracted.push(out_path);
    }

    info!(
        "Extracted {} members from {}",
        extracted.len(),
        archive_path.display()
    );
    Ok(extracted)
}

/// Names of the members of `archive_path` that belong to `kind`
pub fn recognized_members(archive_path: &Path, kind: DatasetKind) -> Result<Vec<String>> {
    let archive = open_archive(archive_path)?;
    Ok(archive
        .file_names()
        .filter(|name| kind.is_member(name))
        .map(str::to_string)
        .collect())
}

/// Rename every raw `kind` member under `dir` with the ready marker.
///
/// A ready file left over from a previous run is replaced by the freshly
/// extracted member. Files of other kinds are not touched.
pub fn mark_ready(dir: &Path, kind: DatasetKind) -> Result<Vec<PathBuf>> {
    let mut renamed = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| EtlError::Io(io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !kind.is_member(&name) {
            continue;
        }

        let old_path = entry.path();
        let new_path = old_path.with_file_name(format!("{}{}", name, READY_SUFFIX));
        fs::rename(old_path, &new_path)?;
        info!("Renamed {} -> {}", name, new_path.display());
        renamed.push(new_path);
    }

    Ok(renamed)
}
