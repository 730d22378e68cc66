//! What one pipeline run produced.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tessel_compiler::{CompilationResult, Diagnostic};
use tessel_targets::Label;

use crate::error::EngineError;

/// Overall result of one target's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Ok,
    Error,
    /// Nothing to compile and nothing to package.
    Skipped,
}

impl ActionResult {
    /// Whether dependents may build on top of this result.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::Skipped)
    }
}

impl std::fmt::Display for ActionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Error => f.write_str("error"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// Files written by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_sources: Option<PathBuf>,
    /// Aggregated side files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_files: Vec<PathBuf>,
    /// Files written by post-processors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_processed: Vec<PathBuf>,
}

impl ProducedOutputs {
    /// Every output in a stable order: primary, generated sources, side
    /// files, post-processed files.
    pub fn all(&self) -> Vec<PathBuf> {
        self.primary
            .iter()
            .chain(&self.generated_sources)
            .chain(&self.side_files)
            .chain(&self.post_processed)
            .cloned()
            .collect()
    }
}

/// Everything a caller needs to know about one pipeline run.
#[derive(Debug)]
pub struct ActionReport {
    pub label: Label,
    pub result: ActionResult,
    /// The compiler's own result, forwarded unmodified. `None` when the
    /// compiler was not invoked.
    pub compilation: Option<CompilationResult>,
    /// The fatal local failure, if any.
    pub failure: Option<EngineError>,
    /// Declared sources plus those staged from source archives.
    pub source_units: Vec<PathBuf>,
    pub outputs: ProducedOutputs,
}

impl ActionReport {
    pub(crate) fn new(label: Label) -> Self {
        Self {
            label,
            result: ActionResult::Error,
            compilation: None,
            failure: None,
            source_units: Vec::new(),
            outputs: ProducedOutputs::default(),
        }
    }

    /// Whether the compiler ran for this attempt.
    pub fn compiler_invoked(&self) -> bool {
        self.compilation.is_some()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.compilation
            .as_ref()
            .map(|c| c.diagnostics.as_slice())
            .unwrap_or_default()
    }
}
