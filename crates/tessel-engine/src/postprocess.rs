//! Post-processors run after a successful compile and package.
//!
//! A chain is built from the names a target enables, looked up in a
//! [`PostProcessorRegistry`]. Processors run in order; the first failure
//! stops the chain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tessel_util::archive::ArchiveWriter;

use crate::error::EngineError;
use crate::report::ProducedOutputs;
use crate::request::BuildRequest;

/// One independent step over a target's finished outputs.
pub trait PostProcessor: Send {
    /// The name targets enable this processor by.
    fn name(&self) -> &str;

    /// Capture what the processor needs from this attempt.
    ///
    /// # Errors
    /// Returns an error if the request cannot be processed at all.
    fn initialize(
        &mut self,
        request: &BuildRequest,
        outputs: &ProducedOutputs,
    ) -> Result<(), EngineError>;

    /// Do the work. Returns the files written.
    ///
    /// # Errors
    /// Returns an error if any output cannot be written.
    fn process(&mut self) -> Result<Vec<PathBuf>, EngineError>;

    /// Files this processor writes for `request`, whether or not they exist
    /// yet. They are removed before each attempt.
    fn declared_outputs(&self, _request: &BuildRequest) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Ordered post-processors for one target.
#[derive(Default)]
pub struct PostProcessorChain {
    processors: Vec<Box<dyn PostProcessor>>,
}

impl PostProcessorChain {
    pub fn new(processors: Vec<Box<dyn PostProcessor>>) -> Self {
        Self { processors }
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Every file the chain may write for `request`, in processor order.
    pub fn declared_outputs(&self, request: &BuildRequest) -> Vec<PathBuf> {
        self.processors
            .iter()
            .flat_map(|p| p.declared_outputs(request))
            .collect()
    }

    /// Run every processor in order.
    ///
    /// # Errors
    /// Returns [`EngineError::PostProcess`] naming the first processor that
    /// failed; processors after it do not run.
    pub fn run(
        &mut self,
        request: &BuildRequest,
        outputs: &ProducedOutputs,
    ) -> Result<Vec<PathBuf>, EngineError> {
        let mut written = Vec::new();
        for processor in &mut self.processors {
            let name = processor.name().to_owned();
            tracing::debug!(label = %request.label, processor = %name, "post-processing");
            let files = processor
                .initialize(request, outputs)
                .and_then(|()| processor.process())
                .map_err(|e| into_post_process(&name, e))?;
            written.extend(files);
        }
        Ok(written)
    }
}

fn into_post_process(name: &str, error: EngineError) -> EngineError {
    match error {
        EngineError::PostProcess { .. } => error,
        other => EngineError::PostProcess {
            processor: name.to_owned(),
            message: other.to_string(),
        },
    }
}

type Factory = Box<dyn Fn() -> Box<dyn PostProcessor> + Send + Sync>;

/// Maps configured names to processor constructors.
pub struct PostProcessorRegistry {
    factories: BTreeMap<String, Factory>,
}

impl PostProcessorRegistry {
    /// A registry with no processors.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// The processors that ship with the engine.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(ChecksumManifest::NAME, || Box::new(ChecksumManifest::default()));
        registry.register(FullyLinkedArchive::NAME, || {
            Box::new(FullyLinkedArchive::default())
        });
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn PostProcessor> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Box::new(factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build a fresh chain for `names`, in order.
    ///
    /// # Errors
    /// Returns [`EngineError::Configuration`] for a name with no processor.
    pub fn chain(&self, names: &[String]) -> Result<PostProcessorChain, EngineError> {
        let mut processors = Vec::with_capacity(names.len());
        for name in names {
            let Some(factory) = self.factories.get(name) else {
                let known: Vec<&str> = self.names().collect();
                return Err(EngineError::Configuration {
                    message: format!(
                        "unknown post-processor `{name}` (available: {})",
                        known.join(", ")
                    ),
                });
            };
            processors.push(factory());
        }
        Ok(PostProcessorChain::new(processors))
    }
}

impl Default for PostProcessorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Writes `<primary>.sha256` in `sha256sum` format.
#[derive(Debug, Default)]
pub struct ChecksumManifest {
    primary: Option<PathBuf>,
}

impl ChecksumManifest {
    pub const NAME: &'static str = "checksum";

    fn output_for(primary: &Path) -> PathBuf {
        sibling_with_suffix(primary, ".sha256")
    }
}

impl PostProcessor for ChecksumManifest {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(
        &mut self,
        _request: &BuildRequest,
        outputs: &ProducedOutputs,
    ) -> Result<(), EngineError> {
        self.primary = outputs.primary.clone();
        Ok(())
    }

    fn process(&mut self) -> Result<Vec<PathBuf>, EngineError> {
        let Some(primary) = &self.primary else {
            return Ok(Vec::new());
        };
        let hash = tessel_util::hash::sha256_file(primary)?;
        let file_name = primary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let manifest = Self::output_for(primary);
        tessel_util::fs::write_atomic(&manifest, format!("{hash}  {file_name}\n").as_bytes())?;
        Ok(vec![manifest])
    }

    fn declared_outputs(&self, request: &BuildRequest) -> Vec<PathBuf> {
        vec![Self::output_for(&request.primary_output)]
    }
}

/// Merges the primary archive with every link library of the local view
/// into `<stem>_fully_linked.<ext>` next to the primary.
#[derive(Debug, Default)]
pub struct FullyLinkedArchive {
    primary: Option<PathBuf>,
    libraries: Vec<PathBuf>,
}

impl FullyLinkedArchive {
    pub const NAME: &'static str = "fully_linked";

    fn output_for(primary: &Path) -> PathBuf {
        let stem = primary
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match primary.extension() {
            Some(ext) => format!("{stem}_fully_linked.{}", ext.to_string_lossy()),
            None => format!("{stem}_fully_linked"),
        };
        primary.with_file_name(name)
    }
}

impl PostProcessor for FullyLinkedArchive {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(
        &mut self,
        request: &BuildRequest,
        outputs: &ProducedOutputs,
    ) -> Result<(), EngineError> {
        self.primary = outputs.primary.clone();
        self.libraries = request.link_libraries.clone();
        Ok(())
    }

    fn process(&mut self) -> Result<Vec<PathBuf>, EngineError> {
        let Some(primary) = &self.primary else {
            return Ok(Vec::new());
        };
        let output = Self::output_for(primary);
        let packaging = |source| EngineError::Packaging {
            path: output.display().to_string(),
            source,
        };

        let mut writer = ArchiveWriter::new();
        for archive in std::iter::once(primary).chain(&self.libraries) {
            writer.add_archive(archive).map_err(packaging)?;
        }
        writer.write(&output).map_err(packaging)?;
        Ok(vec![output])
    }

    fn declared_outputs(&self, request: &BuildRequest) -> Vec<PathBuf> {
        vec![Self::output_for(&request.primary_output)]
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::assemble::LocalView;
    use crate::testing::{jvm_target, Counter};

    struct Probe {
        name: &'static str,
        fail: bool,
        runs: Arc<Counter>,
    }

    impl PostProcessor for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn initialize(&mut self, _: &BuildRequest, _: &ProducedOutputs) -> Result<(), EngineError> {
            Ok(())
        }

        fn process(&mut self) -> Result<Vec<PathBuf>, EngineError> {
            self.runs.bump();
            if self.fail {
                return Err(EngineError::Configuration {
                    message: "boom".to_owned(),
                });
            }
            Ok(vec![PathBuf::from(self.name)])
        }
    }

    fn request(root: &Path) -> BuildRequest {
        let target = jvm_target(root, "//pkg:lib").build().unwrap();
        BuildRequest::new(&target, &LocalView::default()).unwrap()
    }

    fn archive(path: &Path, entries: &[&str]) {
        let mut writer = ArchiveWriter::new();
        for entry in entries {
            writer.add_bytes(entry, entry.as_bytes().to_vec());
        }
        writer.write(path).unwrap();
    }

    #[test]
    fn second_failure_stops_the_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let counters: Vec<Arc<Counter>> = (0..3).map(|_| Arc::new(Counter::default())).collect();
        let names = ["first", "second", "third"];
        let processors: Vec<Box<dyn PostProcessor>> = names
            .iter()
            .zip(&counters)
            .map(|(&name, runs)| {
                Box::new(Probe {
                    name,
                    fail: name == "second",
                    runs: Arc::clone(runs),
                }) as Box<dyn PostProcessor>
            })
            .collect();

        let mut chain = PostProcessorChain::new(processors);
        let err = chain
            .run(&request(tmp.path()), &ProducedOutputs::default())
            .unwrap_err();

        match err {
            EngineError::PostProcess { processor, message } => {
                assert_eq!(processor, "second");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let runs: Vec<usize> = counters.iter().map(|c| c.get()).collect();
        assert_eq!(runs, vec![1, 1, 0]);
    }

    #[test]
    fn successful_chain_collects_outputs_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let runs = Arc::new(Counter::default());
        let processors: Vec<Box<dyn PostProcessor>> = ["a", "b"]
            .into_iter()
            .map(|name| {
                Box::new(Probe {
                    name,
                    fail: false,
                    runs: Arc::clone(&runs),
                }) as Box<dyn PostProcessor>
            })
            .collect();
        let written = PostProcessorChain::new(processors)
            .run(&request(tmp.path()), &ProducedOutputs::default())
            .unwrap();
        assert_eq!(written, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn unknown_name_is_a_configuration_error() {
        let registry = PostProcessorRegistry::builtin();
        let err = registry
            .chain(&["checksum".to_owned(), "obfuscate".to_owned()])
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(matches!(err, EngineError::Configuration { .. }));
        assert!(message.contains("obfuscate"));
        assert!(message.contains("fully_linked"));
    }

    #[test]
    fn registry_builds_fresh_chains() {
        let registry = PostProcessorRegistry::builtin();
        let chain = registry
            .chain(&["fully_linked".to_owned(), "checksum".to_owned()])
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert!(registry.chain(&[]).unwrap().is_empty());
    }

    #[test]
    fn chain_declares_outputs_next_to_primary() {
        let tmp = tempfile::tempdir().unwrap();
        let req = request(tmp.path());
        let chain = PostProcessorRegistry::builtin()
            .chain(&["checksum".to_owned(), "fully_linked".to_owned()])
            .unwrap();
        assert_eq!(
            chain.declared_outputs(&req),
            vec![
                tmp.path().join("out/lib.jar.sha256"),
                tmp.path().join("out/lib_fully_linked.jar"),
            ]
        );
    }

    #[test]
    fn checksum_manifest_matches_primary() {
        let tmp = tempfile::tempdir().unwrap();
        let primary = tmp.path().join("lib.jar");
        std::fs::write(&primary, b"jar bytes").unwrap();
        let outputs = ProducedOutputs {
            primary: Some(primary.clone()),
            ..ProducedOutputs::default()
        };

        let mut checksum = ChecksumManifest::default();
        checksum.initialize(&request(tmp.path()), &outputs).unwrap();
        let written = checksum.process().unwrap();

        let manifest = tmp.path().join("lib.jar.sha256");
        assert_eq!(written, vec![manifest.clone()]);
        let expected = format!(
            "{}  lib.jar\n",
            tessel_util::hash::sha256_bytes(b"jar bytes")
        );
        assert_eq!(std::fs::read_to_string(manifest).unwrap(), expected);
    }

    #[test]
    fn checksum_without_primary_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut checksum = ChecksumManifest::default();
        checksum
            .initialize(&request(tmp.path()), &ProducedOutputs::default())
            .unwrap();
        assert!(checksum.process().unwrap().is_empty());
    }

    #[test]
    fn fully_linked_merges_primary_first() {
        let tmp = tempfile::tempdir().unwrap();
        let primary = tmp.path().join("lib.jar");
        let dep = tmp.path().join("dep.jar");
        archive(&primary, &["a/A.class", "shared.txt"]);
        archive(&dep, &["b/B.class"]);

        let mut req = request(tmp.path());
        req.link_libraries = vec![dep];
        let outputs = ProducedOutputs {
            primary: Some(primary),
            ..ProducedOutputs::default()
        };

        let mut linked = FullyLinkedArchive::default();
        linked.initialize(&req, &outputs).unwrap();
        let written = linked.process().unwrap();

        let output = tmp.path().join("lib_fully_linked.jar");
        assert_eq!(written, vec![output.clone()]);
        assert_eq!(
            tessel_util::archive::list_entries(&output).unwrap(),
            vec![
                "a/A.class".to_owned(),
                "b/B.class".to_owned(),
                "shared.txt".to_owned()
            ]
        );
    }

    #[test]
    fn fully_linked_missing_library_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let primary = tmp.path().join("lib.jar");
        archive(&primary, &["A.class"]);
        let mut req = request(tmp.path());
        req.link_libraries = vec![tmp.path().join("gone.jar")];

        let mut chain = PostProcessorRegistry::builtin()
            .chain(&["fully_linked".to_owned()])
            .unwrap();
        let err = chain
            .run(
                &req,
                &ProducedOutputs {
                    primary: Some(primary),
                    ..ProducedOutputs::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::PostProcess { ref processor, .. } if processor == "fully_linked"
        ));
    }
}
