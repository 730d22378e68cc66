//! Per-language steps of the action pipeline.
//!
//! The pipeline is written once against [`LanguageBackend`]; each language
//! decides how sources are staged, how the compiler is asked to compile them,
//! and what its primary archive looks like.

mod jvm;
mod native;

use std::path::{Path, PathBuf};

use tessel_compiler::{CompilationResult, Compiler};
use tessel_targets::Language;
use tessel_util::archive::ArchiveWriter;

pub use jvm::JvmBackend;
pub use native::NativeBackend;

use crate::error::EngineError;
use crate::request::BuildRequest;

/// What preparation staged for the compile step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prepared {
    /// Declared sources followed by sources extracted from source archives.
    pub sources: Vec<PathBuf>,
    /// Aggregated side files that exist after preparation.
    pub side_files: Vec<PathBuf>,
}

/// Language-specific build steps.
pub trait LanguageBackend: Send + Sync {
    fn language(&self) -> Language;

    /// Reset the per-target directories, stage source units and run the
    /// request's aggregations.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be reset, a source archive
    /// cannot be extracted, or an aggregation fails.
    fn prepare(&self, request: &BuildRequest) -> Result<Prepared, EngineError>;

    /// Compile `sources`. A compiler reporting failure is `Ok` with
    /// `success == false`.
    ///
    /// # Errors
    /// Returns an error only if the compiler could not run at all.
    fn compile_sources(
        &self,
        compiler: &dyn Compiler,
        request: &BuildRequest,
        sources: &[PathBuf],
    ) -> Result<CompilationResult, EngineError>;

    /// Package the output directory into the primary archive.
    ///
    /// Returns `None` when the output directory holds nothing to package.
    ///
    /// # Errors
    /// Returns [`EngineError::Packaging`] if the archive cannot be written.
    fn build_primary_artifact(&self, request: &BuildRequest) -> Result<Option<PathBuf>, EngineError> {
        package_dir(&request.output_dir, &request.primary_output)
    }

    /// Package processor-generated sources.
    ///
    /// Returns `None` unless the request has both a generated-sources
    /// directory and a generated-sources output.
    ///
    /// # Errors
    /// Returns [`EngineError::Packaging`] if the archive cannot be written.
    fn build_generated_sources_artifact(
        &self,
        request: &BuildRequest,
    ) -> Result<Option<PathBuf>, EngineError> {
        let (Some(dir), Some(output)) = (
            &request.generated_sources_dir,
            &request.generated_sources_output,
        ) else {
            return Ok(None);
        };
        let mut writer = ArchiveWriter::new();
        writer.add_dir(dir).map_err(|source| packaging(output, source))?;
        // An empty generated-sources archive is still a declared output.
        writer.write(output).map_err(|source| packaging(output, source))?;
        Ok(Some(output.clone()))
    }
}

/// The backend for `language`.
pub fn for_language(language: Language) -> Box<dyn LanguageBackend> {
    match language {
        Language::Jvm => Box::new(JvmBackend),
        Language::Native => Box::new(NativeBackend),
    }
}

fn packaging(path: &Path, source: tessel_util::error::UtilError) -> EngineError {
    EngineError::Packaging {
        path: path.display().to_string(),
        source,
    }
}

/// Write every file under `dir` into an archive at `dest`.
fn package_dir(dir: &Path, dest: &Path) -> Result<Option<PathBuf>, EngineError> {
    let mut writer = ArchiveWriter::new();
    writer.add_dir(dir).map_err(|source| packaging(dest, source))?;
    if writer.is_empty() {
        return Ok(None);
    }
    writer.write(dest).map_err(|source| packaging(dest, source))?;
    tracing::debug!(archive = %dest.display(), entries = writer.len(), "packaged");
    Ok(Some(dest.to_path_buf()))
}

/// Empty the directories a previous attempt may have filled.
fn reset_dirs(request: &BuildRequest) -> Result<(), EngineError> {
    let dirs = [Some(&request.staging_dir), Some(&request.output_dir)]
        .into_iter()
        .chain([request.generated_sources_dir.as_ref()]);
    for dir in dirs.flatten() {
        tessel_util::fs::remove_dir_all_if_exists(dir)?;
        tessel_util::fs::ensure_dir(dir)?;
    }
    Ok(())
}

/// Extract each source archive into its own staging subdirectory and return
/// the staged files whose extension is in `extensions`, archive by archive.
fn stage_source_archives(
    request: &BuildRequest,
    extensions: &[&str],
) -> Result<Vec<PathBuf>, EngineError> {
    let mut staged = Vec::new();
    for (index, archive) in request.source_archives.iter().enumerate() {
        let dest = request.staging_dir.join(index.to_string());
        tessel_util::archive::extract_all(archive, &dest)?;
        let before = staged.len();
        staged.extend(tessel_util::fs::collect_files(&dest, extensions)?);
        tracing::debug!(
            label = %request.label,
            archive = %archive.display(),
            staged = staged.len().saturating_sub(before),
            "staged source archive"
        );
    }
    Ok(staged)
}

/// Shared preparation: reset, stage, aggregate.
fn prepare_common(request: &BuildRequest, extensions: &[&str]) -> Result<Prepared, EngineError> {
    reset_dirs(request)?;
    let mut sources = request.sources.clone();
    sources.extend(stage_source_archives(request, extensions)?);
    let side_files = crate::aggregate::run_aggregations(request)?;
    Ok(Prepared {
        sources,
        side_files,
    })
}
