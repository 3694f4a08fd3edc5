use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

use flate2::read::MultiGzDecoder;
use tempfile::{Builder, TempDir};

use crate::error::AfDataError;

/// Prefix of every staging path; hidden so half-written data is easy to spot
/// and never mistaken for an artifact.
pub const STAGING_PREFIX: &str = ".afdata-staging-";

/// A path is populated when it is a regular file or a directory holding at
/// least one entry. Anything unreadable counts as not populated.
pub fn is_populated(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => true,
        Ok(meta) if meta.is_dir() => fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        _ => false,
    }
}

pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Runs `work` against a temporary file next to `dest` and moves it into
/// place only when `work` succeeds. On failure `dest` is left untouched.
///
/// Callers hold the source lock: staging leftovers of interrupted runs in
/// `dest`'s directory are swept before a new one is created.
pub fn stage_file<F>(dest: &Path, work: F) -> Result<(), AfDataError>
where
    F: FnOnce(&Path) -> Result<(), AfDataError>,
{
    let parent = ensure_parent(dest)?;
    sweep_staging(parent);
    let temp = Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|err| AfDataError::Filesystem(err.to_string()))?
        .into_temp_path();
    work(&*temp)?;
    publish_permissions(&temp, 0o644)?;
    // rename(2) swaps a file in atomically; the old one is never removed first.
    temp.persist(dest)
        .map_err(|err| AfDataError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Directory counterpart of [`stage_file`].
pub fn stage_dir<F>(dest: &Path, work: F) -> Result<(), AfDataError>
where
    F: FnOnce(&Path) -> Result<(), AfDataError>,
{
    let parent = ensure_parent(dest)?;
    sweep_staging(parent);
    let temp_dir = Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)
        .map_err(|err| AfDataError::Filesystem(err.to_string()))?;
    work(temp_dir.path())?;
    publish_permissions(temp_dir.path(), 0o755)?;
    replace_dir(temp_dir.path(), dest)
}

/// Moves the tree at `from` to `to`. An existing `to` is renamed aside
/// first and deleted only after the new tree is in place, so `to` holds
/// either the complete old tree or the complete new one.
pub fn replace_dir(from: &Path, to: &Path) -> Result<(), AfDataError> {
    let fs_err =
        |err: io::Error| AfDataError::Filesystem(format!("replace {}: {err}", to.display()));
    if fs::symlink_metadata(to).is_err() {
        return fs::rename(from, to).map_err(fs_err);
    }

    let aside = set_aside(to)?;
    if let Err(err) = fs::rename(from, to) {
        // Put the old tree back rather than leave the slot empty.
        let _ = fs::rename(aside.path().join(RETIRED), to);
        return Err(fs_err(err));
    }
    discard(aside);
    Ok(())
}

/// Removes an artifact by renaming it aside before deleting it, so an
/// interrupted removal never leaves a partial tree at `path`.
pub fn remove_artifact(path: &Path) -> Result<(), AfDataError> {
    if fs::symlink_metadata(path).is_err() {
        return Ok(());
    }
    discard(set_aside(path)?);
    Ok(())
}

/// Deletes staging leftovers of interrupted runs from `dir`. Entries that
/// cannot be removed are logged and retried by the next sweep.
pub fn sweep_staging(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
            continue;
        }
        let path = entry.path();
        match remove_path(&path) {
            Ok(()) => tracing::info!("removed stale staging entry {}", path.display()),
            Err(err) => tracing::warn!("cannot remove stale staging entry {}: {err}", path.display()),
        }
    }
}

const RETIRED: &str = "retired";

// Renames `path` into a fresh staging directory beside it.
fn set_aside(path: &Path) -> Result<TempDir, AfDataError> {
    let parent = path
        .parent()
        .ok_or_else(|| AfDataError::Filesystem("invalid artifact path".to_string()))?;
    let fs_err =
        |err: io::Error| AfDataError::Filesystem(format!("retire {}: {err}", path.display()));
    let aside = Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".old")
        .tempdir_in(parent)
        .map_err(fs_err)?;
    fs::rename(path, aside.path().join(RETIRED)).map_err(fs_err)?;
    Ok(aside)
}

fn discard(aside: TempDir) {
    let path = aside.path().to_path_buf();
    if let Err(err) = aside.close() {
        tracing::warn!("cannot remove retired artifact {}: {err}", path.display());
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Decodes a (possibly multi-member) gzip file into `dst`.
pub fn gunzip(src: &Path, dst: &Path) -> Result<(), AfDataError> {
    let input = File::open(src)
        .map_err(|err| AfDataError::Filesystem(format!("open {}: {err}", src.display())))?;
    let output = File::create(dst)
        .map_err(|err| AfDataError::Filesystem(format!("create {}: {err}", dst.display())))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut writer = BufWriter::new(output);
    io::copy(&mut decoder, &mut writer).map_err(|err| AfDataError::Transfer {
        tool: "gzip".to_string(),
        message: format!("{}: {err}", src.display()),
    })?;
    writer
        .flush()
        .map_err(|err| AfDataError::Filesystem(err.to_string()))?;
    Ok(())
}

fn ensure_parent(dest: &Path) -> Result<&Path, AfDataError> {
    let parent = dest
        .parent()
        .ok_or_else(|| AfDataError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| AfDataError::Filesystem(err.to_string()))?;
    Ok(parent)
}

// tempfile creates owner-only entries; published artifacts are shared.
#[cfg(unix)]
fn publish_permissions(path: &Path, mode: u32) -> Result<(), AfDataError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|err| AfDataError::Filesystem(err.to_string()))
}

#[cfg(not(unix))]
fn publish_permissions(_path: &Path, _mode: u32) -> Result<(), AfDataError> {
    Ok(())
}
