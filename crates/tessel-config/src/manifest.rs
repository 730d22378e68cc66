use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tessel_targets::{Aggregation, Label, Language, Outputs, Target, TargetError};

use crate::settings::EngineSettings;

/// A `TARGET.toml` declaring one build target.
///
/// Relative paths resolve against the directory containing the file. Source
/// and header lists accept glob patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetManifest {
    pub target: TargetSection,
    #[serde(default)]
    pub deps: DepsSection,
    pub outputs: OutputsSection,
    #[serde(default, rename = "aggregate", skip_serializing_if = "Vec::is_empty")]
    pub aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSection {
    pub label: String,
    pub language: Language,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub source_archives: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub mapping_files: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub alwayslink: bool,
    #[serde(default)]
    pub entry_classes: Vec<String>,
    #[serde(default)]
    pub processors: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub post_processors: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepsSection {
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub non_propagated: Vec<String>,
    #[serde(default)]
    pub runtime: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputsSection {
    pub primary: PathBuf,
    #[serde(default)]
    pub generated_sources: Option<PathBuf>,
    /// Defaults to `<intermediate_root>/<package>/<name>` from `tessel.toml`.
    #[serde(default)]
    pub intermediate_dir: Option<PathBuf>,
}

impl TargetManifest {
    /// Read and parse a `TARGET.toml` from the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let manifest: TargetManifest =
            toml::from_str(&content).map_err(|e| ManifestError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;
        Ok(manifest)
    }

    /// Resolve the declaration into a validated [`Target`].
    ///
    /// `base_dir` is the directory the manifest lives in.
    ///
    /// # Errors
    /// Returns an error if a label is malformed, a glob pattern is invalid, or
    /// the resulting target fails validation.
    pub fn to_target(
        &self,
        base_dir: &Path,
        settings: &EngineSettings,
    ) -> Result<Target, ManifestError> {
        let section = &self.target;
        let label = parse_label(&section.label)?;

        let intermediate_dir = match &self.outputs.intermediate_dir {
            Some(dir) => base_dir.join(dir),
            None => default_intermediate_dir(&settings.intermediate_root, &label),
        };
        let outputs = Outputs {
            primary: base_dir.join(&self.outputs.primary),
            generated_sources: self
                .outputs
                .generated_sources
                .as_ref()
                .map(|p| base_dir.join(p)),
            intermediate_dir,
        };

        let aggregations = self.aggregations.iter().map(|a| Aggregation {
            entry: a.entry.clone(),
            output: a.output.as_ref().map(|p| base_dir.join(p)),
        });

        let target = Target::builder(label, section.language, outputs)
            .deps(parse_labels(&self.deps.deps)?)
            .non_propagated_deps(parse_labels(&self.deps.non_propagated)?)
            .runtime_deps(parse_labels(&self.deps.runtime)?)
            .sources(expand(base_dir, &section.sources)?)
            .source_archives(expand(base_dir, &section.source_archives)?)
            .headers(expand(base_dir, &section.headers)?)
            .mapping_files(expand(base_dir, &section.mapping_files)?)
            .plugins(section.plugins.iter().map(|p| base_dir.join(p)))
            .defines(section.defines.iter().cloned())
            .alwayslink(section.alwayslink)
            .entry_classes(section.entry_classes.iter().cloned())
            .processors(section.processors.iter().cloned())
            .post_processors(section.post_processors.iter().cloned())
            .aggregations(aggregations);

        let target = section
            .attributes
            .iter()
            .fold(target, |t, (k, v)| t.attribute(k.as_str(), v.as_str()));

        target
            .build()
            .map_err(|source| ManifestError::Invalid { source })
    }
}

fn default_intermediate_dir(root: &Path, label: &Label) -> PathBuf {
    let mut dir = root.to_path_buf();
    for segment in label.package().split('/').filter(|s| !s.is_empty()) {
        dir.push(segment);
    }
    dir.push(label.name());
    dir
}

fn parse_label(s: &str) -> Result<Label, ManifestError> {
    Label::parse(s).map_err(|source| ManifestError::Invalid { source })
}

fn parse_labels(labels: &[String]) -> Result<Vec<Label>, ManifestError> {
    labels.iter().map(|s| parse_label(s)).collect()
}

fn expand(base_dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, ManifestError> {
    tessel_util::fs::expand_globs(base_dir, patterns)
        .map_err(|source| ManifestError::Glob { source })
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid TARGET.toml at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("{source}")]
    Invalid { source: TargetError },
    #[error("{source}")]
    Glob {
        source: tessel_util::error::UtilError,
    },
}
