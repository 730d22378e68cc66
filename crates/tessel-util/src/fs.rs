//! Filesystem utilities for Tessel.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::UtilError;

/// Create a directory and all parent directories if they do not exist.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Copy `src` to `dest`, preferring a hard link for speed.
///
/// Falls back to a regular copy if hard linking fails (e.g. cross-device).
///
/// # Errors
/// Returns an error if both hard linking and copying fail.
pub fn materialize(src: &Path, dest: &Path) -> Result<(), UtilError> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }

    // Remove existing destination if present, so hard_link doesn't fail.
    remove_file_if_exists(dest)?;

    if std::fs::hard_link(src, dest).is_err() {
        std::fs::copy(src, dest).map_err(|source| UtilError::Io {
            path: dest.display().to_string(),
            source,
        })?;
    }

    Ok(())
}

/// Replace the contents of `dest` with `data` in one step.
///
/// The bytes are written to a sibling temp file which is then renamed over
/// `dest`, so readers never observe a partially written file.
///
/// # Errors
/// Returns an error if the temp file cannot be written or renamed.
pub fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), UtilError> {
    let tmp_path = temp_sibling(dest);
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }

    std::fs::write(&tmp_path, data).map_err(|source| UtilError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;

    rename(&tmp_path, dest).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp_path);
    })
}

/// Return a hidden temp path next to `dest` (".name.tmp-<pid>").
pub fn temp_sibling(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_owned());
    let tmp_name = format!(".{name}.tmp-{}", std::process::id());
    dest.parent()
        .map(|p| p.join(&tmp_name))
        .unwrap_or_else(|| PathBuf::from(&tmp_name))
}

/// Rename `from` to `to`, replacing `to` if it exists.
///
/// # Errors
/// Returns an error if the rename fails.
pub fn rename(from: &Path, to: &Path) -> Result<(), UtilError> {
    std::fs::rename(from, to).map_err(|source| UtilError::Io {
        path: to.display().to_string(),
        source,
    })
}

/// Remove a file. Returns `true` if a file was removed, `false` if it was absent.
///
/// # Errors
/// Returns an error if the file exists but cannot be removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, UtilError> {
    // Also covers a path whose parent is not a directory.
    if std::fs::symlink_metadata(path).is_err() {
        return Ok(false);
    }
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(UtilError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Remove a directory and all its contents. No error if the directory is absent.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<(), UtilError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(UtilError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Collect every regular file under `dir`, recursively, sorted by path.
///
/// A missing `dir` yields an empty list.
///
/// # Errors
/// Returns an error if `dir` exists but cannot be read.
pub fn collect_all_files(dir: &Path) -> Result<Vec<PathBuf>, UtilError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    collect_files_recursive(dir, None, &mut files)?;
    files.sort();
    Ok(files)
}

/// Collect all files whose extension is one of `extensions` under `dir`,
/// recursively, sorted by path.
///
/// # Errors
/// Returns an error if `dir` cannot be read.
pub fn collect_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, UtilError> {
    let mut files = Vec::new();
    collect_files_recursive(dir, Some(extensions), &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files_recursive(
    dir: &Path,
    extensions: Option<&[&str]>,
    out: &mut Vec<PathBuf>,
) -> Result<(), UtilError> {
    let entries = std::fs::read_dir(dir).map_err(|source| UtilError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| UtilError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();

        if path.is_dir() {
            collect_files_recursive(&path, extensions, out)?;
            continue;
        }
        let matches = match extensions {
            Some(wanted) => path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| wanted.contains(&e)),
            None => true,
        };
        if matches {
            out.push(path);
        }
    }

    Ok(())
}

/// Expand glob `patterns` relative to `base` into a sorted, de-duplicated file list.
///
/// Patterns without glob metacharacters name a single file and are kept even
/// if the file does not exist yet, so a missing source surfaces at compile time
/// rather than silently disappearing.
///
/// # Errors
/// Returns an error if any pattern is not a valid glob.
pub fn expand_globs(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, UtilError> {
    let mut files = BTreeSet::new();

    for pattern in patterns {
        let full = base.join(pattern);
        if !pattern.contains(['*', '?', '[']) {
            files.insert(full);
            continue;
        }

        let full_str = full.display().to_string();
        let paths = glob::glob(&full_str).map_err(|e| UtilError::GlobPattern {
            pattern: full_str.clone(),
            message: e.to_string(),
        })?;
        for path in paths.filter_map(Result::ok).filter(|p| p.is_file()) {
            files.insert(path);
        }
    }

    Ok(files.into_iter().collect())
}
