//! Dependency metadata and build summaries written after every attempt.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessel_targets::Language;

use crate::digest::{InputDigest, InputFile};
use crate::error::EngineError;
use crate::report::{ActionReport, ActionResult, ProducedOutputs};
use crate::request::BuildRequest;

/// Receives the resolved inputs of one attempt and whether it succeeded.
pub trait DependencySink: Send + Sync {
    /// # Errors
    /// Returns an error if the metadata cannot be recorded.
    fn emit(
        &self,
        request: &BuildRequest,
        resolved_inputs: &[PathBuf],
        success: bool,
    ) -> Result<(), EngineError>;
}

/// Receives the per-attempt summary.
pub trait SummarySink: Send + Sync {
    /// # Errors
    /// Returns an error if the summary cannot be recorded.
    fn emit_summary(&self, request: &BuildRequest, summary: &BuildSummary)
        -> Result<(), EngineError>;
}

/// Contents of `deps.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub label: String,
    pub success: bool,
    pub digest: InputDigest,
    pub inputs: Vec<InputFile>,
}

impl DependencyRecord {
    /// Hash every input and digest the list in order.
    ///
    /// # Errors
    /// Returns an error if an existing input cannot be read.
    pub fn new(label: &str, resolved_inputs: &[PathBuf], success: bool) -> Result<Self, EngineError> {
        let inputs = resolved_inputs
            .iter()
            .map(|p| InputFile::hash(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            label: label.to_owned(),
            success,
            digest: InputDigest::compute(&inputs),
            inputs,
        })
    }

    /// # Errors
    /// Returns an error if the file cannot be read or is not a record.
    pub fn read(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| EngineError::Metadata {
            message: format!("{}: {e}", path.display()),
        })
    }
}

/// Writes `<intermediate>/deps.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDependencySink;

impl JsonDependencySink {
    pub const FILE_NAME: &'static str = "deps.json";

    pub fn path_for(request: &BuildRequest) -> PathBuf {
        request.intermediate_dir.join(Self::FILE_NAME)
    }
}

impl DependencySink for JsonDependencySink {
    fn emit(
        &self,
        request: &BuildRequest,
        resolved_inputs: &[PathBuf],
        success: bool,
    ) -> Result<(), EngineError> {
        let record = DependencyRecord::new(&request.label.to_string(), resolved_inputs, success)?;
        let json = serde_json::to_string_pretty(&record).map_err(|e| EngineError::Metadata {
            message: format!("cannot serialize dependency metadata: {e}"),
        })?;
        let path = Self::path_for(request);
        tessel_util::fs::write_atomic(&path, json.as_bytes())?;
        tracing::debug!(
            label = %request.label,
            inputs = record.inputs.len(),
            success,
            "wrote dependency metadata"
        );
        Ok(())
    }
}

/// What one attempt produced, written to `summary.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub label: String,
    pub language: Language,
    pub result: ActionResult,
    pub compiler_invoked: bool,
    pub error_count: usize,
    pub warning_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default)]
    pub outputs: ProducedOutputs,
}

impl BuildSummary {
    pub fn from_report(request: &BuildRequest, report: &ActionReport) -> Self {
        let (error_count, warning_count) = report
            .compilation
            .as_ref()
            .map_or((0, 0), |c| (c.error_count(), c.warning_count()));
        Self {
            label: request.label.to_string(),
            language: request.language,
            result: report.result,
            compiler_invoked: report.compiler_invoked(),
            error_count,
            warning_count,
            failure: report.failure.as_ref().map(ToString::to_string),
            outputs: report.outputs.clone(),
        }
    }
}

/// Writes `<intermediate>/summary.toml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlSummarySink;

impl TomlSummarySink {
    pub const FILE_NAME: &'static str = "summary.toml";

    pub fn path_for(request: &BuildRequest) -> PathBuf {
        request.intermediate_dir.join(Self::FILE_NAME)
    }
}

impl SummarySink for TomlSummarySink {
    fn emit_summary(
        &self,
        request: &BuildRequest,
        summary: &BuildSummary,
    ) -> Result<(), EngineError> {
        let content = toml::to_string_pretty(summary).map_err(|e| EngineError::Metadata {
            message: format!("cannot serialize build summary: {e}"),
        })?;
        tessel_util::fs::write_atomic(&Self::path_for(request), content.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::assemble::LocalView;
    use crate::testing::jvm_target;

    fn request(root: &Path) -> BuildRequest {
        let target = jvm_target(root, "//pkg:lib").build().unwrap();
        BuildRequest::new(&target, &LocalView::default()).unwrap()
    }

    #[test]
    fn deps_json_records_inputs_and_success() {
        let tmp = tempfile::tempdir().unwrap();
        let dep = tmp.path().join("dep.jar");
        std::fs::write(&dep, b"dep").unwrap();
        let missing = tmp.path().join("missing.jar");
        let req = request(tmp.path());

        JsonDependencySink
            .emit(&req, &[dep.clone(), missing.clone()], false)
            .unwrap();

        let record = DependencyRecord::read(&JsonDependencySink::path_for(&req)).unwrap();
        assert_eq!(record.label, "//pkg:lib");
        assert!(!record.success);
        assert_eq!(record.inputs.len(), 2);
        assert_eq!(record.inputs.first().unwrap().path, dep);
        assert!(record.inputs.first().unwrap().sha256.is_some());
        assert_eq!(record.inputs.get(1).unwrap().path, missing);
        assert!(record.inputs.get(1).unwrap().sha256.is_none());
        assert_eq!(record.digest, InputDigest::compute(&record.inputs));
    }

    #[test]
    fn deps_json_is_replaced_each_attempt() {
        let tmp = tempfile::tempdir().unwrap();
        let req = request(tmp.path());
        JsonDependencySink.emit(&req, &[], false).unwrap();
        JsonDependencySink.emit(&req, &[], true).unwrap();
        let record = DependencyRecord::read(&JsonDependencySink::path_for(&req)).unwrap();
        assert!(record.success);
    }

    #[test]
    fn summary_toml_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let req = request(tmp.path());
        let summary = BuildSummary {
            label: "//pkg:lib".to_owned(),
            language: Language::Jvm,
            result: ActionResult::Error,
            compiler_invoked: true,
            error_count: 2,
            warning_count: 1,
            failure: Some("post-processor `checksum` failed: disk full".to_owned()),
            outputs: ProducedOutputs {
                primary: Some(PathBuf::from("out/lib.jar")),
                ..ProducedOutputs::default()
            },
        };

        TomlSummarySink.emit_summary(&req, &summary).unwrap();
        let content = std::fs::read_to_string(TomlSummarySink::path_for(&req)).unwrap();
        assert!(content.contains("result = \"error\""));
        let parsed: BuildSummary = toml::from_str(&content).unwrap();
        assert_eq!(parsed, summary);
    }
}
