// 📝 Staged writes - build a file next to its target, then rename over it

use crate::error::{EtlError, Result};
use std::fs;
use std::path::Path;
use tempfile::NamedTempFile;

fn parent_dir(target: &Path) -> &Path {
    target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Temporary file in the directory of `target`.
///
/// An existing target lends its permissions to the replacement. A new one
/// gets the mode a plain `File::create` would (0666 less the umask), not
/// tempfile's private 0600.
pub fn staging_file(target: &Path, prefix: &str) -> Result<NamedTempFile> {
    let dir = parent_dir(target);
    fs::create_dir_all(dir)?;

    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix).suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let temp = builder.tempfile_in(dir)?;

    if let Ok(metadata) = fs::metadata(target) {
        temp.as_file().set_permissions(metadata.permissions())?;
    }
    Ok(temp)
}

/// Flush `temp` to disk and rename it over `target`
pub fn commit(temp: NamedTempFile, target: &Path) -> Result<()> {
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| EtlError::Io(e.error))?;
    Ok(())
}
