//! Typed, immutable provider values and the per-target provider store.
//!
//! Every provider kind declares how it merges across the dependency graph
//! through [`Provider::MERGE`]; the assembler only reads that rule.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessel_targets::Label;

use crate::error::EngineError;

/// How a provider kind combines a target's own value with its dependencies'.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Local contribution first, then each dependency in declaration order,
    /// duplicates dropped where they reappear.
    TransitiveUnion,
    /// Only the local value; dependency values are ignored.
    Override,
    /// The local view sees own value plus each direct dependency's own value;
    /// the exposed value is own value only.
    DirectOnly,
}

/// Capability key of a provider. A store holds at most one provider per kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ProviderKind {
    LinkParams,
    InstrumentedFiles,
    EntryClasses,
    MappingFiles,
    DirectHeaders,
    FilesToBuild,
    CompileSettings,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::LinkParams,
        ProviderKind::InstrumentedFiles,
        ProviderKind::EntryClasses,
        ProviderKind::MappingFiles,
        ProviderKind::DirectHeaders,
        ProviderKind::FilesToBuild,
        ProviderKind::CompileSettings,
    ];

    /// The merge rule declared by this kind's provider type.
    pub fn merge_rule(self) -> MergeRule {
        match self {
            Self::LinkParams => LinkParams::MERGE,
            Self::InstrumentedFiles => InstrumentedFiles::MERGE,
            Self::EntryClasses => EntryClasses::MERGE,
            Self::MappingFiles => MappingFiles::MERGE,
            Self::DirectHeaders => DirectHeaders::MERGE,
            Self::FilesToBuild => FilesToBuild::MERGE,
            Self::CompileSettings => CompileSettings::MERGE,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LinkParams => "LinkParams",
            Self::InstrumentedFiles => "InstrumentedFiles",
            Self::EntryClasses => "EntryClasses",
            Self::MappingFiles => "MappingFiles",
            Self::DirectHeaders => "DirectHeaders",
            Self::FilesToBuild => "FilesToBuild",
            Self::CompileSettings => "CompileSettings",
        };
        f.write_str(name)
    }
}

/// A typed provider value.
pub trait Provider: Clone + Into<AnyProvider> {
    const KIND: ProviderKind;
    const MERGE: MergeRule;

    /// Borrow the typed value out of an erased provider of the same kind.
    fn from_any(any: &AnyProvider) -> Option<&Self>;
}

/// A provider kind whose values combine across targets.
///
/// Only [`MergeRule::TransitiveUnion`] kinds implement this; the other rules
/// never combine two values.
pub trait UnionProvider: Provider {
    /// Append `other`'s items that are not already present, keeping order.
    fn union_with(&mut self, other: &Self);
}

/// Append the items of `from` missing from `into`, in order.
pub(crate) fn extend_unique<T: Eq + Hash + Clone>(into: &mut Vec<T>, from: &[T]) {
    let mut seen: HashSet<T> = into.iter().cloned().collect();
    for item in from {
        if seen.insert(item.clone()) {
            into.push(item.clone());
        }
    }
}

/// A library to link, as contributed by the target that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkLibrary {
    pub archive: PathBuf,
    pub owner: Label,
    pub alwayslink: bool,
    /// The archive path without its extension; unique per library.
    pub identifier: String,
}

impl LinkLibrary {
    pub fn new(archive: &Path, owner: Label, alwayslink: bool) -> Self {
        Self {
            archive: archive.to_path_buf(),
            owner,
            alwayslink,
            identifier: archive.with_extension("").display().to_string(),
        }
    }
}

/// Libraries to link, transitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParams {
    pub libraries: Vec<LinkLibrary>,
}

impl LinkParams {
    pub fn archives(&self) -> impl Iterator<Item = &Path> {
        self.libraries.iter().map(|l| l.archive.as_path())
    }
}

/// Source units eligible for coverage, transitively: declared sources and
/// those staged from source archives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentedFiles {
    pub sources: Vec<PathBuf>,
}

/// Entry-class names, transitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryClasses {
    pub classes: Vec<String>,
}

/// Generated-code mapping files, transitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingFiles {
    pub files: Vec<PathBuf>,
}

/// Public headers of exactly one target, for strict header checking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectHeaders {
    pub headers: Vec<PathBuf>,
}

/// Outputs produced by this target itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesToBuild {
    pub files: Vec<PathBuf>,
}

/// Per-target compile settings that never propagate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileSettings {
    pub defines: Vec<String>,
    pub alwayslink: bool,
}

/// A provider with its kind erased; the serialized form of a store entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum AnyProvider {
    LinkParams(LinkParams),
    InstrumentedFiles(InstrumentedFiles),
    EntryClasses(EntryClasses),
    MappingFiles(MappingFiles),
    DirectHeaders(DirectHeaders),
    FilesToBuild(FilesToBuild),
    CompileSettings(CompileSettings),
}

impl AnyProvider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::LinkParams(_) => ProviderKind::LinkParams,
            Self::InstrumentedFiles(_) => ProviderKind::InstrumentedFiles,
            Self::EntryClasses(_) => ProviderKind::EntryClasses,
            Self::MappingFiles(_) => ProviderKind::MappingFiles,
            Self::DirectHeaders(_) => ProviderKind::DirectHeaders,
            Self::FilesToBuild(_) => ProviderKind::FilesToBuild,
            Self::CompileSettings(_) => ProviderKind::CompileSettings,
        }
    }

    /// An empty provider of `kind`.
    pub fn empty(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::LinkParams => LinkParams::default().into(),
            ProviderKind::InstrumentedFiles => InstrumentedFiles::default().into(),
            ProviderKind::EntryClasses => EntryClasses::default().into(),
            ProviderKind::MappingFiles => MappingFiles::default().into(),
            ProviderKind::DirectHeaders => DirectHeaders::default().into(),
            ProviderKind::FilesToBuild => FilesToBuild::default().into(),
            ProviderKind::CompileSettings => CompileSettings::default().into(),
        }
    }

    /// Union `other` into `self` when both are the same union kind.
    ///
    /// Returns `false` (and leaves `self` untouched) on a kind mismatch or
    /// for a kind that does not merge by union.
    pub fn union_with(&mut self, other: &AnyProvider) -> bool {
        match (self, other) {
            (Self::LinkParams(a), Self::LinkParams(b)) => a.union_with(b),
            (Self::InstrumentedFiles(a), Self::InstrumentedFiles(b)) => a.union_with(b),
            (Self::EntryClasses(a), Self::EntryClasses(b)) => a.union_with(b),
            (Self::MappingFiles(a), Self::MappingFiles(b)) => a.union_with(b),
            _ => return false,
        }
        true
    }
}

macro_rules! impl_provider {
    ($ty:ident, union |$a:ident, $b:ident| $body:block) => {
        impl_provider!($ty, MergeRule::TransitiveUnion);

        impl UnionProvider for $ty {
            fn union_with(&mut self, other: &Self) {
                let $a = self;
                let $b = other;
                $body
            }
        }
    };
    ($ty:ident, $merge:expr) => {
        impl Provider for $ty {
            const KIND: ProviderKind = ProviderKind::$ty;
            const MERGE: MergeRule = $merge;

            fn from_any(any: &AnyProvider) -> Option<&Self> {
                match any {
                    AnyProvider::$ty(p) => Some(p),
                    _ => None,
                }
            }
        }

        impl From<$ty> for AnyProvider {
            fn from(p: $ty) -> Self {
                AnyProvider::$ty(p)
            }
        }
    };
}

impl_provider!(LinkParams, union |a, b| {
    extend_unique(&mut a.libraries, &b.libraries);
});
impl_provider!(InstrumentedFiles, union |a, b| {
    extend_unique(&mut a.sources, &b.sources);
});
impl_provider!(EntryClasses, union |a, b| {
    extend_unique(&mut a.classes, &b.classes);
});
impl_provider!(MappingFiles, union |a, b| {
    extend_unique(&mut a.files, &b.files);
});
impl_provider!(DirectHeaders, MergeRule::DirectOnly);
impl_provider!(FilesToBuild, MergeRule::Override);
impl_provider!(CompileSettings, MergeRule::Override);

/// All providers attached to one target. Immutable; shared through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoreRepr", into = "StoreRepr")]
pub struct ProviderStore {
    label: Label,
    providers: BTreeMap<ProviderKind, AnyProvider>,
}

#[derive(Serialize, Deserialize)]
struct StoreRepr {
    label: Label,
    providers: Vec<AnyProvider>,
}

impl From<ProviderStore> for StoreRepr {
    fn from(store: ProviderStore) -> Self {
        Self {
            label: store.label,
            providers: store.providers.into_values().collect(),
        }
    }
}

impl TryFrom<StoreRepr> for ProviderStore {
    type Error = EngineError;

    fn try_from(repr: StoreRepr) -> Result<Self, Self::Error> {
        let mut builder = ProviderStoreBuilder::new(repr.label);
        for provider in repr.providers {
            builder.add_any(provider)?;
        }
        Ok(builder.build())
    }
}

impl ProviderStore {
    /// An empty store for `label`.
    pub fn empty(label: Label) -> Arc<Self> {
        ProviderStoreBuilder::new(label).finalize()
    }

    /// The target these providers belong to.
    pub fn label(&self) -> &Label {
        &self.label
    }

    /// Typed lookup.
    pub fn get<P: Provider>(&self) -> Option<&P> {
        self.providers.get(&P::KIND).and_then(P::from_any)
    }

    pub fn get_any(&self, kind: ProviderKind) -> Option<&AnyProvider> {
        self.providers.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.providers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Metadata {
            message: e.to_string(),
        })
    }

    /// Parse a store previously written by [`ProviderStore::to_json`].
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or lists a kind twice.
    pub fn from_json(json: &str) -> Result<Arc<Self>, EngineError> {
        let store: Self = serde_json::from_str(json).map_err(|e| EngineError::Metadata {
            message: e.to_string(),
        })?;
        Ok(Arc::new(store))
    }

    /// Read a store from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Arc<Self>, EngineError> {
        let json = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Write the store as JSON, replacing `path` atomically.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn write(&self, path: &Path) -> Result<(), EngineError> {
        let json = self.to_json()?;
        tessel_util::fs::write_atomic(path, json.as_bytes())?;
        Ok(())
    }
}

/// Append-only builder for a [`ProviderStore`].
#[derive(Debug)]
pub struct ProviderStoreBuilder {
    label: Label,
    providers: BTreeMap<ProviderKind, AnyProvider>,
}

impl ProviderStoreBuilder {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            providers: BTreeMap::new(),
        }
    }

    /// Add a typed provider.
    ///
    /// # Errors
    /// Returns [`EngineError::DuplicateProvider`] if the kind is already present.
    pub fn add<P: Provider>(&mut self, provider: P) -> Result<&mut Self, EngineError> {
        self.add_any(provider.into())
    }

    /// Add an erased provider.
    ///
    /// # Errors
    /// Returns [`EngineError::DuplicateProvider`] if the kind is already present.
    pub fn add_any(&mut self, provider: AnyProvider) -> Result<&mut Self, EngineError> {
        let kind = provider.kind();
        if self.providers.contains_key(&kind) {
            return Err(EngineError::DuplicateProvider {
                label: self.label.to_string(),
                kind,
            });
        }
        self.providers.insert(kind, provider);
        Ok(self)
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    fn build(self) -> ProviderStore {
        ProviderStore {
            label: self.label,
            providers: self.providers,
        }
    }

    /// Freeze the store. Nothing can be added afterwards.
    pub fn finalize(self) -> Arc<ProviderStore> {
        Arc::new(self.build())
    }
}
