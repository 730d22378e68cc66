//! Provider assembly: from a target, its dependencies' stores, and its own
//! contribution to the store it exposes to dependents.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tessel_targets::{Label, Target};

use crate::error::EngineError;
use crate::provider::{
    extend_unique, AnyProvider, CompileSettings, DirectHeaders, EntryClasses, FilesToBuild,
    InstrumentedFiles, LinkLibrary, LinkParams, MappingFiles, MergeRule, ProviderKind,
    ProviderStore, ProviderStoreBuilder,
};
use crate::report::ProducedOutputs;

/// Finalized stores of already-built targets, keyed by label.
pub type DependencyStores = HashMap<Label, Arc<ProviderStore>>;

fn store_for<'a>(
    target: &Target,
    dep: &Label,
    stores: &'a DependencyStores,
) -> Result<&'a ProviderStore, EngineError> {
    stores
        .get(dep)
        .map(Arc::as_ref)
        .ok_or_else(|| EngineError::MissingDependencyStore {
            label: target.label().to_string(),
            dep: dep.to_string(),
        })
}

/// Check that every dependency, in every scope, has a store.
///
/// # Errors
/// Returns [`EngineError::MissingDependencyStore`] for the first missing one.
pub fn check_dependency_stores(
    target: &Target,
    stores: &DependencyStores,
) -> Result<(), EngineError> {
    for dep in target.all_deps() {
        store_for(target, dep, stores)?;
    }
    Ok(())
}

/// Build the store a target exposes to its dependents.
///
/// Union kinds start from the local contribution and take each exported
/// dependency (`deps`, then `runtime_deps`) in declaration order. Override and
/// direct-only kinds expose the local value alone. Non-propagated
/// dependencies never reach the result.
///
/// # Errors
/// Returns an error if `local` repeats a kind or a dependency has no store.
pub fn assemble(
    target: &Target,
    stores: &DependencyStores,
    local: Vec<AnyProvider>,
) -> Result<Arc<ProviderStore>, EngineError> {
    check_dependency_stores(target, stores)?;

    let label = target.label();
    let mut local_by_kind = BTreeMap::new();
    for provider in local {
        let kind = provider.kind();
        if local_by_kind.insert(kind, provider).is_some() {
            return Err(EngineError::DuplicateProvider {
                label: label.to_string(),
                kind,
            });
        }
    }

    let exported: Vec<&Label> = target
        .deps()
        .iter()
        .chain(target.runtime_deps())
        .collect();

    let mut builder = ProviderStoreBuilder::new(label.clone());
    for kind in ProviderKind::ALL {
        let own = local_by_kind.remove(&kind);
        let merged = match kind.merge_rule() {
            MergeRule::TransitiveUnion => {
                let mut parts: Vec<&AnyProvider> = own.iter().collect();
                for dep in &exported {
                    if let Some(theirs) = store_for(target, dep, stores)?.get_any(kind) {
                        parts.push(theirs);
                    }
                }
                (!parts.is_empty()).then(|| {
                    let mut acc = AnyProvider::empty(kind);
                    for part in parts {
                        acc.union_with(part);
                    }
                    acc
                })
            }
            MergeRule::Override | MergeRule::DirectOnly => own,
        };
        if let Some(provider) = merged {
            builder.add_any(provider)?;
        }
    }

    let store = builder.finalize();
    tracing::debug!(label = %label, kinds = store.len(), "assembled providers");
    Ok(store)
}

/// A target's own provider contribution after a successful build.
pub fn local_providers(
    target: &Target,
    source_units: &[PathBuf],
    outputs: &ProducedOutputs,
) -> Vec<AnyProvider> {
    let mut providers = Vec::new();

    if let Some(primary) = &outputs.primary {
        providers.push(
            LinkParams {
                libraries: vec![LinkLibrary::new(
                    primary,
                    target.label().clone(),
                    target.alwayslink(),
                )],
            }
            .into(),
        );
    }
    if !source_units.is_empty() {
        providers.push(
            InstrumentedFiles {
                sources: source_units.to_vec(),
            }
            .into(),
        );
    }
    if !target.entry_classes().is_empty() {
        providers.push(
            EntryClasses {
                classes: target.entry_classes().to_vec(),
            }
            .into(),
        );
    }
    if !target.mapping_files().is_empty() {
        providers.push(
            MappingFiles {
                files: target.mapping_files().to_vec(),
            }
            .into(),
        );
    }
    if !target.headers().is_empty() {
        providers.push(
            DirectHeaders {
                headers: target.headers().to_vec(),
            }
            .into(),
        );
    }
    providers.push(
        FilesToBuild {
            files: outputs.all(),
        }
        .into(),
    );
    providers.push(
        CompileSettings {
            defines: target.defines().to_vec(),
            alwayslink: target.alwayslink(),
        }
        .into(),
    );

    providers
}

/// What a target sees of its dependencies while it builds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalView {
    /// Link inputs of `deps` and `non_propagated_deps`, transitive, deduplicated.
    pub classpath: Vec<PathBuf>,
    /// The libraries behind `classpath`.
    pub link_libraries: Vec<LinkLibrary>,
    /// Own headers plus each direct dependency's own headers.
    pub visible_headers: Vec<PathBuf>,
}

impl LocalView {
    /// Resolve the local view of `target`.
    ///
    /// # Errors
    /// Returns [`EngineError::MissingDependencyStore`] if any dependency, in
    /// any scope, has no store.
    pub fn resolve(target: &Target, stores: &DependencyStores) -> Result<Self, EngineError> {
        check_dependency_stores(target, stores)?;

        let mut view = LocalView {
            visible_headers: target.headers().to_vec(),
            ..LocalView::default()
        };
        for dep in target.deps().iter().chain(target.non_propagated_deps()) {
            let store = store_for(target, dep, stores)?;
            if let Some(link) = store.get::<LinkParams>() {
                extend_unique(&mut view.link_libraries, &link.libraries);
            }
            if let Some(headers) = store.get::<DirectHeaders>() {
                extend_unique(&mut view.visible_headers, &headers.headers);
            }
        }
        let archives: Vec<PathBuf> = view
            .link_libraries
            .iter()
            .map(|l| l.archive.clone())
            .collect();
        extend_unique(&mut view.classpath, &archives);

        Ok(view)
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod proptests {
    use std::path::PathBuf;

    use proptest::prelude::*;
    use tessel_targets::{Language, Outputs};

    use super::*;

    fn classes(names: &[String]) -> AnyProvider {
        EntryClasses {
            classes: names.to_vec(),
        }
        .into()
    }

    proptest! {
        /// A -> [B, C]: the exposed union is A's classes, then B's, then C's,
        /// each name kept at its first position.
        #[test]
        fn union_is_ordered_dedup_of_concatenation(
            a in proptest::collection::vec("[a-e]", 0..6),
            b in proptest::collection::vec("[a-e]", 0..6),
            c in proptest::collection::vec("[a-e]", 0..6),
        ) {
            let lb = Label::parse("//b:b").unwrap();
            let lc = Label::parse("//c:c").unwrap();
            let mut stores = DependencyStores::new();
            for (l, names) in [(&lb, &b), (&lc, &c)] {
                let mut builder = ProviderStoreBuilder::new(l.clone());
                builder.add_any(classes(names)).unwrap();
                stores.insert(l.clone(), builder.finalize());
            }
            let t = Target::builder(
                Label::parse("//a:a").unwrap(),
                Language::Jvm,
                Outputs {
                    primary: PathBuf::from("a.jar"),
                    generated_sources: None,
                    intermediate_dir: PathBuf::from("tmp"),
                },
            )
            .deps([lb, lc])
            .build()
            .unwrap();

            let store = assemble(&t, &stores, vec![classes(&a)]).unwrap();
            let got = &store.get::<EntryClasses>().unwrap().classes;

            let mut expected: Vec<String> = Vec::new();
            for name in a.iter().chain(&b).chain(&c) {
                if !expected.contains(name) {
                    expected.push(name.clone());
                }
            }
            prop_assert_eq!(got, &expected);
        }
    }
}
