//! The immutable `Target` and its validating builder.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Label, TargetError};

/// Which language backend builds a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Class directory, jar-style archive, source-archive staging.
    Jvm,
    /// Object directory, static-library archive, public header staging.
    Native,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jvm => f.write_str("jvm"),
            Self::Native => f.write_str("native"),
        }
    }
}

/// Where a target's build products go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outputs {
    /// The primary archive (jar or static library).
    pub primary: PathBuf,
    /// The generated-sources archive, if the target produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_sources: Option<PathBuf>,
    /// Per-target scratch space: staging, compiled outputs, metadata.
    pub intermediate_dir: PathBuf,
}

/// A side-channel entry merged across the target's source archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Entry name looked up in every source archive, e.g. `protobuf.meta`.
    pub entry: String,
    /// Output file. Defaults to `<output dir>/<entry>` so the merged file is
    /// packaged into the primary archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

/// One buildable unit. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    label: Label,
    language: Language,
    deps: Vec<Label>,
    non_propagated_deps: Vec<Label>,
    runtime_deps: Vec<Label>,
    sources: Vec<PathBuf>,
    source_archives: Vec<PathBuf>,
    headers: Vec<PathBuf>,
    mapping_files: Vec<PathBuf>,
    attributes: BTreeMap<String, String>,
    defines: Vec<String>,
    alwayslink: bool,
    entry_classes: Vec<String>,
    processors: Vec<String>,
    plugins: Vec<PathBuf>,
    post_processors: Vec<String>,
    aggregations: Vec<Aggregation>,
    outputs: Outputs,
}

impl Target {
    /// Start building a target.
    pub fn builder(label: Label, language: Language, outputs: Outputs) -> TargetBuilder {
        TargetBuilder {
            target: Self {
                label,
                language,
                deps: Vec::new(),
                non_propagated_deps: Vec::new(),
                runtime_deps: Vec::new(),
                sources: Vec::new(),
                source_archives: Vec::new(),
                headers: Vec::new(),
                mapping_files: Vec::new(),
                attributes: BTreeMap::new(),
                defines: Vec::new(),
                alwayslink: false,
                entry_classes: Vec::new(),
                processors: Vec::new(),
                plugins: Vec::new(),
                post_processors: Vec::new(),
                aggregations: Vec::new(),
                outputs,
            },
        }
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Direct dependencies, in declaration order.
    pub fn deps(&self) -> &[Label] {
        &self.deps
    }

    /// Dependencies visible while building this target but never re-exported.
    pub fn non_propagated_deps(&self) -> &[Label] {
        &self.non_propagated_deps
    }

    /// Dependencies needed only at run time; exported, not compiled against.
    pub fn runtime_deps(&self) -> &[Label] {
        &self.runtime_deps
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn source_archives(&self) -> &[PathBuf] {
        &self.source_archives
    }

    /// Public headers (native targets).
    pub fn headers(&self) -> &[PathBuf] {
        &self.headers
    }

    /// Generated-code mapping files this target contributes.
    pub fn mapping_files(&self) -> &[PathBuf] {
        &self.mapping_files
    }

    /// Opaque attributes; the core passes them through to backends untouched.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    pub fn alwayslink(&self) -> bool {
        self.alwayslink
    }

    pub fn entry_classes(&self) -> &[String] {
        &self.entry_classes
    }

    /// Annotation processor class names.
    pub fn processors(&self) -> &[String] {
        &self.processors
    }

    /// Compiler plugin archives.
    pub fn plugins(&self) -> &[PathBuf] {
        &self.plugins
    }

    /// Post-processor names, in run order.
    pub fn post_processors(&self) -> &[String] {
        &self.post_processors
    }

    pub fn aggregations(&self) -> &[Aggregation] {
        &self.aggregations
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// Every dependency label across all scopes, without duplicates.
    pub fn all_deps(&self) -> Vec<&Label> {
        let mut seen = HashSet::new();
        self.deps
            .iter()
            .chain(&self.non_propagated_deps)
            .chain(&self.runtime_deps)
            .filter(|label| seen.insert(*label))
            .collect()
    }
}

/// Validating builder for [`Target`].
#[derive(Debug, Clone)]
pub struct TargetBuilder {
    target: Target,
}

impl TargetBuilder {
    pub fn dep(mut self, label: Label) -> Self {
        self.target.deps.push(label);
        self
    }

    pub fn deps(mut self, labels: impl IntoIterator<Item = Label>) -> Self {
        self.target.deps.extend(labels);
        self
    }

    pub fn non_propagated_deps(mut self, labels: impl IntoIterator<Item = Label>) -> Self {
        self.target.non_propagated_deps.extend(labels);
        self
    }

    pub fn runtime_deps(mut self, labels: impl IntoIterator<Item = Label>) -> Self {
        self.target.runtime_deps.extend(labels);
        self
    }

    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.target.sources.push(path.into());
        self
    }

    pub fn sources(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.target.sources.extend(paths);
        self
    }

    pub fn source_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.target.source_archives.push(path.into());
        self
    }

    pub fn source_archives(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.target.source_archives.extend(paths);
        self
    }

    pub fn headers(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.target.headers.extend(paths);
        self
    }

    pub fn mapping_files(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.target.mapping_files.extend(paths);
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.target.attributes.insert(key.into(), value.into());
        self
    }

    pub fn defines(mut self, defines: impl IntoIterator<Item = String>) -> Self {
        self.target.defines.extend(defines);
        self
    }

    pub fn alwayslink(mut self, alwayslink: bool) -> Self {
        self.target.alwayslink = alwayslink;
        self
    }

    pub fn entry_classes(mut self, classes: impl IntoIterator<Item = String>) -> Self {
        self.target.entry_classes.extend(classes);
        self
    }

    pub fn processor(mut self, class_name: impl Into<String>) -> Self {
        self.target.processors.push(class_name.into());
        self
    }

    pub fn processors(mut self, class_names: impl IntoIterator<Item = String>) -> Self {
        self.target.processors.extend(class_names);
        self
    }

    pub fn plugins(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.target.plugins.extend(paths);
        self
    }

    pub fn post_processor(mut self, name: impl Into<String>) -> Self {
        self.target.post_processors.push(name.into());
        self
    }

    pub fn post_processors(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.target.post_processors.extend(names);
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.target.aggregations.push(aggregation);
        self
    }

    pub fn aggregations(mut self, aggregations: impl IntoIterator<Item = Aggregation>) -> Self {
        self.target.aggregations.extend(aggregations);
        self
    }

    /// Validate and freeze the target.
    ///
    /// # Errors
    /// Returns an error if the target depends on itself, repeats a dependency
    /// within one scope, enables a post-processor twice, gives two public
    /// headers (or two native sources) the same name, or declares an
    /// aggregation whose entry name is empty or escapes the archive root.
    pub fn build(self) -> Result<Target, TargetError> {
        let target = self.target;
        let label = target.label.to_string();

        for (scope, deps) in [
            ("deps", &target.deps),
            ("non_propagated_deps", &target.non_propagated_deps),
            ("runtime_deps", &target.runtime_deps),
        ] {
            let mut seen = HashSet::new();
            for dep in deps {
                if *dep == target.label {
                    return Err(TargetError::SelfDependency { label });
                }
                if !seen.insert(dep) {
                    return Err(TargetError::DuplicateDependency {
                        label,
                        dep: dep.to_string(),
                        scope,
                    });
                }
            }
        }

        let mut names = HashSet::new();
        for name in &target.post_processors {
            if !names.insert(name.as_str()) {
                return Err(TargetError::DuplicatePostProcessor {
                    label,
                    name: name.clone(),
                });
            }
        }

        // Headers are staged flat into one include directory and native
        // objects are named after their source's stem.
        check_unique_names(&label, "public headers", &target.headers, Path::file_name)?;
        if target.language == Language::Native {
            check_unique_names(&label, "native sources", &target.sources, Path::file_stem)?;
        }

        for aggregation in &target.aggregations {
            if let Some(reason) = invalid_entry_reason(&aggregation.entry) {
                return Err(TargetError::InvalidAggregation {
                    label,
                    entry: aggregation.entry.clone(),
                    reason: reason.to_owned(),
                });
            }
        }

        Ok(target)
    }
}

fn check_unique_names(
    label: &str,
    what: &'static str,
    paths: &[PathBuf],
    name_of: fn(&Path) -> Option<&std::ffi::OsStr>,
) -> Result<(), TargetError> {
    let mut seen: HashMap<&std::ffi::OsStr, &PathBuf> = HashMap::new();
    for path in paths {
        let Some(name) = name_of(path) else {
            continue;
        };
        if let Some(first) = seen.insert(name, path) {
            return Err(TargetError::NameCollision {
                label: label.to_owned(),
                what,
                name: name.to_string_lossy().into_owned(),
                first: first.display().to_string(),
                second: path.display().to_string(),
            });
        }
    }
    Ok(())
}

fn invalid_entry_reason(entry: &str) -> Option<&'static str> {
    if entry.is_empty() {
        return Some("entry name is empty");
    }
    let escapes = Path::new(entry).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    escapes.then_some("entry name must be a relative path inside the archive")
}
