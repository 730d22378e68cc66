//! The materialized view of a target for one build attempt.

use std::path::PathBuf;

use tessel_targets::{Aggregation, Label, Language, Target};

use crate::assemble::LocalView;
use crate::error::EngineError;

/// Everything one pipeline run needs. Created per attempt and consumed once.
///
/// Directories live under the target's intermediate directory:
/// `staging/` for extracted source units, `classes/` or `objs/` for compiled
/// outputs, `include/` for staged public headers, `gensrc/` for
/// processor-generated sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub label: Label,
    pub language: Language,
    /// Declared source units. Units staged from archives are added by the
    /// backend during preparation.
    pub sources: Vec<PathBuf>,
    pub source_archives: Vec<PathBuf>,
    /// Link inputs of `deps` and `non_propagated_deps`.
    pub classpath: Vec<PathBuf>,
    /// Archives of every link library in the local view, in classpath order.
    pub link_libraries: Vec<PathBuf>,
    /// This target's public headers.
    pub headers: Vec<PathBuf>,
    /// Own headers plus direct dependencies' headers.
    pub visible_headers: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub plugins: Vec<PathBuf>,
    pub processors: Vec<String>,
    pub post_processors: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    pub intermediate_dir: PathBuf,
    pub output_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub include_dir: PathBuf,
    pub generated_sources_dir: Option<PathBuf>,
    pub primary_output: PathBuf,
    pub generated_sources_output: Option<PathBuf>,
}

impl BuildRequest {
    /// Materialize `target` against its resolved local view.
    ///
    /// # Errors
    /// Returns [`EngineError::Configuration`] if the target declares a
    /// generated-sources output without any annotation processors.
    pub fn new(target: &Target, view: &LocalView) -> Result<Self, EngineError> {
        let outputs = target.outputs();
        if outputs.generated_sources.is_some() && target.processors().is_empty() {
            return Err(EngineError::Configuration {
                message: format!(
                    "{} declares a generated-sources output but no annotation processors",
                    target.label()
                ),
            });
        }

        let intermediate = outputs.intermediate_dir.clone();
        let output_dir = match target.language() {
            Language::Jvm => intermediate.join("classes"),
            Language::Native => intermediate.join("objs"),
        };
        let generated_sources_dir =
            (!target.processors().is_empty()).then(|| intermediate.join("gensrc"));

        Ok(Self {
            label: target.label().clone(),
            language: target.language(),
            sources: target.sources().to_vec(),
            source_archives: target.source_archives().to_vec(),
            classpath: view.classpath.clone(),
            link_libraries: view
                .link_libraries
                .iter()
                .map(|l| l.archive.clone())
                .collect(),
            headers: target.headers().to_vec(),
            visible_headers: view.visible_headers.clone(),
            defines: target.defines().to_vec(),
            plugins: target.plugins().to_vec(),
            processors: target.processors().to_vec(),
            post_processors: target.post_processors().to_vec(),
            aggregations: target.aggregations().to_vec(),
            output_dir,
            staging_dir: intermediate.join("staging"),
            include_dir: intermediate.join("include"),
            generated_sources_dir,
            primary_output: outputs.primary.clone(),
            generated_sources_output: outputs.generated_sources.clone(),
            intermediate_dir: intermediate,
        })
    }

    /// Where an aggregation writes its merged output.
    pub fn aggregation_output(&self, aggregation: &Aggregation) -> PathBuf {
        aggregation
            .output
            .clone()
            .unwrap_or_else(|| self.output_dir.join(&aggregation.entry))
    }
}
