//! Per-target build orchestration: typed providers, the action pipeline,
//! artifact aggregation and post-processing.

pub mod aggregate;
pub mod assemble;
pub mod backend;
pub mod digest;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod postprocess;
pub mod provider;
pub mod report;
pub mod request;
pub mod run;

#[cfg(test)]
mod testing;

pub use aggregate::{aggregate, scan, AggregateOutcome, DirSource, EntrySource, TarSource};
pub use assemble::{assemble, local_providers, DependencyStores, LocalView};
pub use backend::{JvmBackend, LanguageBackend, NativeBackend};
pub use digest::{InputDigest, InputFile};
pub use error::EngineError;
pub use metadata::{
    BuildSummary, DependencyRecord, DependencySink, JsonDependencySink, SummarySink,
    TomlSummarySink,
};
pub use pipeline::{ActionPipeline, CancellationToken};
pub use postprocess::{
    ChecksumManifest, FullyLinkedArchive, PostProcessor, PostProcessorChain,
    PostProcessorRegistry,
};
pub use provider::{
    AnyProvider, CompileSettings, DirectHeaders, EntryClasses, FilesToBuild, InstrumentedFiles,
    LinkLibrary, LinkParams, MappingFiles, MergeRule, Provider, ProviderKind, ProviderStore,
    ProviderStoreBuilder, UnionProvider,
};
pub use report::{ActionReport, ActionResult, ProducedOutputs};
pub use request::BuildRequest;
pub use run::{run_level, run_target, Engine, TargetOutcome};
