//! Tar archive primitives: list, read, extract, and deterministic writing.
//!
//! Archives may be plain tar or gzip-compressed tar; the format is detected
//! from the leading magic bytes, not the file extension.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::UtilError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn archive_err(path: &Path, message: impl std::fmt::Display) -> UtilError {
    UtilError::Archive {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

fn io_err(path: &Path, source: std::io::Error) -> UtilError {
    UtilError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Open `path` as a tar archive, transparently decoding gzip.
fn open(path: &Path) -> Result<tar::Archive<Box<dyn Read>>, UtilError> {
    let mut file = File::open(path).map_err(|source| io_err(path, source))?;

    let mut magic = [0u8; 2];
    let n = file
        .read(&mut magic)
        .map_err(|source| io_err(path, source))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|source| io_err(path, source))?;

    let reader: Box<dyn Read> = if n == GZIP_MAGIC.len() && magic == GZIP_MAGIC {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(tar::Archive::new(reader))
}

/// Normalize an entry path to a `/`-separated name without a leading `./`.
fn entry_name(raw: &Path) -> String {
    raw.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// List the names of all regular-file entries in an archive, in archive order.
///
/// # Errors
/// Returns an error if the archive cannot be opened or is malformed.
pub fn list_entries(path: &Path) -> Result<Vec<String>, UtilError> {
    let mut archive = open(path)?;
    let entries = archive.entries().map_err(|e| archive_err(path, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| archive_err(path, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw = entry.path().map_err(|e| archive_err(path, e))?;
        names.push(entry_name(&raw));
    }
    Ok(names)
}

/// Read the bytes of the first regular-file entry named `name`.
///
/// Returns `Ok(None)` when the archive has no such entry.
///
/// # Errors
/// Returns an error if the archive cannot be opened or is malformed.
pub fn read_entry(path: &Path, name: &str) -> Result<Option<Vec<u8>>, UtilError> {
    let mut archive = open(path)?;
    let entries = archive.entries().map_err(|e| archive_err(path, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| archive_err(path, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw = entry.path().map_err(|e| archive_err(path, e))?;
        if entry_name(&raw) != name {
            continue;
        }
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| archive_err(path, e))?;
        return Ok(Some(data));
    }
    Ok(None)
}

/// Extract every regular-file entry of an archive into `dest`.
///
/// Each entry's path is validated to stay within `dest`, so a malicious
/// archive cannot write outside the staging directory. Returns the extracted
/// file paths, sorted.
///
/// # Errors
/// Returns an error if the archive is malformed, an entry escapes `dest`, or
/// a file cannot be written.
pub fn extract_all(path: &Path, dest: &Path) -> Result<Vec<PathBuf>, UtilError> {
    crate::fs::ensure_dir(dest)?;
    let canonical_dest = std::fs::canonicalize(dest).map_err(|source| io_err(dest, source))?;

    let mut archive = open(path)?;
    let entries = archive.entries().map_err(|e| archive_err(path, e))?;

    let mut extracted = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_err(path, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path().map_err(|e| archive_err(path, e))?.into_owned();

        let escapes = entry_path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        let target = canonical_dest.join(&entry_path);
        if escapes || !target.starts_with(&canonical_dest) {
            return Err(UtilError::PathTraversal {
                entry_path: entry_path.display().to_string(),
                dest: canonical_dest.display().to_string(),
            });
        }

        if let Some(parent) = target.parent() {
            crate::fs::ensure_dir(parent)?;
        }
        entry.unpack(&target).map_err(|e| archive_err(path, e))?;
        extracted.push(target);
    }

    extracted.sort();
    Ok(extracted)
}

/// Accumulates named entries and writes them as one deterministic tar archive.
///
/// Entries are written sorted by name with zeroed timestamps and ownership,
/// so the same inputs always produce byte-identical archives. When two
/// entries share a name, the first one added wins.
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ArchiveWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an in-memory entry. Returns `false` if the name was already present.
    pub fn add_bytes(&mut self, name: &str, data: Vec<u8>) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(name.to_owned(), data);
        true
    }

    /// Add every file under `dir`, named by its path relative to `dir`.
    ///
    /// Returns the number of entries added.
    ///
    /// # Errors
    /// Returns an error if `dir` cannot be walked or a file cannot be read.
    pub fn add_dir(&mut self, dir: &Path) -> Result<usize, UtilError> {
        let mut added = 0usize;
        for file in crate::fs::collect_all_files(dir)? {
            let rel = file.strip_prefix(dir).unwrap_or(&file);
            let data = std::fs::read(&file).map_err(|source| io_err(&file, source))?;
            if self.add_bytes(&entry_name(rel), data) {
                added = added.saturating_add(1);
            }
        }
        Ok(added)
    }

    /// Copy every regular-file entry of an existing archive.
    ///
    /// Returns the number of entries added.
    ///
    /// # Errors
    /// Returns an error if the archive cannot be read.
    pub fn add_archive(&mut self, path: &Path) -> Result<usize, UtilError> {
        let mut archive = open(path)?;
        let entries = archive.entries().map_err(|e| archive_err(path, e))?;

        let mut added = 0usize;
        for entry in entries {
            let mut entry = entry.map_err(|e| archive_err(path, e))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry_name(&entry.path().map_err(|e| archive_err(path, e))?);
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| archive_err(path, e))?;
            if self.add_bytes(&name, data) {
                added = added.saturating_add(1);
            }
        }
        Ok(added)
    }

    /// Number of entries collected so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries have been collected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the archive to `dest`, replacing any previous file atomically.
    ///
    /// # Errors
    /// Returns an error if the temp file cannot be written or renamed.
    pub fn write(&self, dest: &Path) -> Result<(), UtilError> {
        if let Some(parent) = dest.parent() {
            crate::fs::ensure_dir(parent)?;
        }
        let tmp_path = crate::fs::temp_sibling(dest);

        let result = self
            .write_to(&tmp_path)
            .and_then(|()| crate::fs::rename(&tmp_path, dest));
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }

    fn write_to(&self, path: &Path) -> Result<(), UtilError> {
        let file = File::create(path).map_err(|source| io_err(path, source))?;
        let mut builder = tar::Builder::new(BufWriter::new(file));
        builder.mode(tar::HeaderMode::Deterministic);

        for (name, data) in &self.entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(u64::try_from(data.len()).unwrap_or(u64::MAX));
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_entry_type(tar::EntryType::Regular);
            builder
                .append_data(&mut header, name, data.as_slice())
                .map_err(|e| archive_err(path, e))?;
        }

        let mut writer = builder.into_inner().map_err(|e| archive_err(path, e))?;
        writer.flush().map_err(|source| io_err(path, source))?;
        let file = writer
            .into_inner()
            .map_err(|e| archive_err(path, e.error()))?;
        file.sync_all().map_err(|source| io_err(path, source))
    }
}
