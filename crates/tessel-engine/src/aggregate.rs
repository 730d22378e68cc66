//! Cross-archive aggregation of a named side-channel entry.
//!
//! A pass scans every input for the entry, concatenates the hits in input
//! order, and then either replaces the output with the result or, when no
//! input carried the entry, deletes a stale output left by an earlier build.

use std::path::{Path, PathBuf};

use tessel_util::error::UtilError;

use crate::error::EngineError;
use crate::request::BuildRequest;

/// Entry name of protobuf descriptor metadata carried inside source archives.
pub const PROTOBUF_META: &str = "protobuf.meta";

/// Something that may contain a named entry.
pub trait EntrySource: Send + Sync {
    /// Human-readable location, for errors and logs.
    fn location(&self) -> &Path;

    /// Read `name`, or `Ok(None)` if this source does not carry it.
    ///
    /// # Errors
    /// Returns an error if the source exists but cannot be read.
    fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, UtilError>;
}

impl<T: EntrySource + ?Sized> EntrySource for Box<T> {
    fn location(&self) -> &Path {
        (**self).location()
    }

    fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, UtilError> {
        (**self).read_entry(name)
    }
}

/// A tar or tar.gz archive.
#[derive(Debug, Clone)]
pub struct TarSource {
    path: PathBuf,
}

impl TarSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EntrySource for TarSource {
    fn location(&self) -> &Path {
        &self.path
    }

    fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, UtilError> {
        tessel_util::archive::read_entry(&self.path, name)
    }
}

/// A directory whose files are entries, e.g. an already-staged archive.
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl EntrySource for DirSource {
    fn location(&self) -> &Path {
        &self.dir
    }

    fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, UtilError> {
        let path = self.dir.join(name);
        if !path.is_file() {
            return Ok(None);
        }
        std::fs::read(&path)
            .map(Some)
            .map_err(|source| UtilError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

/// Lazy iterator over the inputs carrying an entry, yielding
/// `(input index, bytes)` in input order.
///
/// Cloning a scan restarts it from the clone's current position; calling
/// [`scan`] again restarts from the first input.
pub struct Scan<'a, S> {
    inputs: &'a [S],
    entry_name: &'a str,
    next: usize,
}

impl<S> Clone for Scan<'_, S> {
    fn clone(&self) -> Self {
        Self {
            inputs: self.inputs,
            entry_name: self.entry_name,
            next: self.next,
        }
    }
}

impl<S: EntrySource> Iterator for Scan<'_, S> {
    type Item = Result<(usize, Vec<u8>), UtilError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(input) = self.inputs.get(self.next) {
            let index = self.next;
            self.next = self.next.saturating_add(1);
            match input.read_entry(self.entry_name) {
                Ok(Some(bytes)) => return Some(Ok((index, bytes))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// Start a scan of `inputs` for `entry_name`.
pub fn scan<'a, S: EntrySource>(inputs: &'a [S], entry_name: &'a str) -> Scan<'a, S> {
    Scan {
        inputs,
        entry_name,
        next: 0,
    }
}

/// What one aggregation pass did to its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    /// The output now holds `bytes` bytes gathered from `hits` inputs.
    Written { bytes: usize, hits: usize },
    /// No input carried the entry; a stale output was deleted.
    RemovedStale,
    /// No input carried the entry and there was no output to delete.
    Absent,
}

/// Merge `entry_name` from every input into `output`.
///
/// # Errors
/// Returns [`EngineError::Aggregation`] if an input cannot be read or the
/// output cannot be written or deleted.
pub fn aggregate<S: EntrySource>(
    inputs: &[S],
    entry_name: &str,
    output: &Path,
) -> Result<AggregateOutcome, EngineError> {
    let fail = |source: UtilError| EngineError::Aggregation {
        entry: entry_name.to_owned(),
        output: output.display().to_string(),
        source,
    };

    let mut buffer = Vec::new();
    let mut hits = 0usize;
    for hit in scan(inputs, entry_name) {
        let (index, bytes) = hit.map_err(fail)?;
        if let Some(input) = inputs.get(index) {
            tracing::trace!(
                entry = entry_name,
                from = %input.location().display(),
                len = bytes.len(),
                "aggregating entry"
            );
        }
        buffer.extend_from_slice(&bytes);
        hits = hits.saturating_add(1);
    }

    if !buffer.is_empty() {
        tessel_util::fs::write_atomic(output, &buffer).map_err(fail)?;
        return Ok(AggregateOutcome::Written {
            bytes: buffer.len(),
            hits,
        });
    }
    if tessel_util::fs::remove_file_if_exists(output).map_err(fail)? {
        tracing::debug!(output = %output.display(), "removed stale aggregate");
        return Ok(AggregateOutcome::RemovedStale);
    }
    Ok(AggregateOutcome::Absent)
}

/// Run every aggregation a request enables over its source archives.
///
/// Returns the outputs that exist after the pass.
///
/// # Errors
/// Returns the first aggregation failure.
pub fn run_aggregations(request: &BuildRequest) -> Result<Vec<PathBuf>, EngineError> {
    let inputs: Vec<TarSource> = request
        .source_archives
        .iter()
        .map(TarSource::new)
        .collect();

    let mut written = Vec::new();
    for aggregation in &request.aggregations {
        let output = request.aggregation_output(aggregation);
        let outcome = aggregate(&inputs, &aggregation.entry, &output)?;
        tracing::debug!(
            label = %request.label,
            entry = %aggregation.entry,
            ?outcome,
            "aggregation finished"
        );
        if matches!(outcome, AggregateOutcome::Written { .. }) {
            written.push(output);
        }
    }
    Ok(written)
}
