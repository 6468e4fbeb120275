//! Atomic file replacement: write to `<name>.tmp`, fsync, rename into place.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::{StoreError, StoreResult};

/// Suffix of staged files that have not been renamed into place yet.
pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// New file content written next to its target, waiting to be renamed over it.
///
/// Dropping an uncommitted `StagedFile` removes the temp file, leaving the
/// target untouched.
#[derive(Debug)]
pub(crate) struct StagedFile {
    target: PathBuf,
    tmp: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn stage(target: &Path, bytes: &[u8]) -> StoreResult<Self> {
        let tmp = tmp_path(target);
        if let Err(e) = write_synced(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&tmp, e));
        }
        Ok(Self {
            target: target.to_path_buf(),
            tmp,
            committed: false,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(&mut self) -> StoreResult<()> {
        rename(&self.tmp, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Stage and commit in one step.
pub(crate) fn write_atomic(target: &Path, bytes: &[u8]) -> StoreResult<()> {
    StagedFile::stage(target, bytes)?.commit()
}

/// Put a file back the way it was: prior bytes, or absent.
pub(crate) fn restore(target: &Path, prior: Option<&[u8]>) -> StoreResult<()> {
    match prior {
        Some(bytes) => write_atomic(target, bytes),
        None => match fs::remove_file(target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(target, e)),
        },
    }
}

/// Current bytes of a file, `None` if it does not exist.
pub(crate) fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Remove temp files left behind by an interrupted write. Returns how many were removed.
pub(crate) fn remove_stale_temps(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_tmp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TMP_SUFFIX));
        if is_tmp && path.is_file() {
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::warn!(path = %path.display(), "removed stale temp file");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not remove stale temp file")
                }
            }
        }
    }
    removed
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TMP_SUFFIX);
    target.with_file_name(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn rename(from: &Path, to: &Path) -> StoreResult<()> {
    injected_failure(to)?;
    fs::rename(from, to).map_err(|e| StoreError::io(to, e))
}

#[cfg(not(test))]
fn injected_failure(_target: &Path) -> StoreResult<()> {
    Ok(())
}

#[cfg(test)]
fn injected_failure(target: &Path) -> StoreResult<()> {
    if fault::should_fail(target) {
        return Err(StoreError::io(
            target,
            std::io::Error::new(std::io::ErrorKind::Other, "injected rename failure"),
        ));
    }
    Ok(())
}
