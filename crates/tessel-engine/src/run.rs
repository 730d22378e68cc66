//! Entry point for building already-scheduled targets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};
use tessel_compiler::{CommandCompiler, Compiler, FlagStyle};
use tessel_config::EngineSettings;
use tessel_targets::{Language, Target};

use crate::assemble::{assemble, local_providers, DependencyStores, LocalView};
use crate::backend::for_language;
use crate::error::EngineError;
use crate::metadata::{DependencySink, JsonDependencySink, SummarySink, TomlSummarySink};
use crate::pipeline::{ActionPipeline, CancellationToken};
use crate::postprocess::PostProcessorRegistry;
use crate::provider::ProviderStore;
use crate::report::{ActionReport, ActionResult};
use crate::request::BuildRequest;

/// Collaborators shared by every target an engine builds.
pub struct Engine {
    jvm: Arc<dyn Compiler>,
    native: Arc<dyn Compiler>,
    registry: Arc<PostProcessorRegistry>,
    dependency_sink: Arc<dyn DependencySink>,
    summary_sink: Option<Arc<dyn SummarySink>>,
    cancel: CancellationToken,
}

impl Engine {
    /// An engine whose compilers run the commands named in `settings`, with
    /// the built-in post-processors and on-disk metadata sinks.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let jvm = CommandCompiler::new(&settings.jvm.command, FlagStyle::Jvm)
            .with_extra_args(settings.jvm.args.clone());
        let native = CommandCompiler::new(&settings.native.command, FlagStyle::Native)
            .with_extra_args(settings.native.args.clone());
        Self::new(Arc::new(jvm), Arc::new(native))
    }

    pub fn new(jvm: Arc<dyn Compiler>, native: Arc<dyn Compiler>) -> Self {
        Self {
            jvm,
            native,
            registry: Arc::new(PostProcessorRegistry::builtin()),
            dependency_sink: Arc::new(JsonDependencySink),
            summary_sink: Some(Arc::new(TomlSummarySink)),
            cancel: CancellationToken::default(),
        }
    }

    pub fn with_registry(mut self, registry: PostProcessorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_dependency_sink(mut self, sink: Arc<dyn DependencySink>) -> Self {
        self.dependency_sink = sink;
        self
    }

    pub fn with_summary_sink(mut self, sink: Option<Arc<dyn SummarySink>>) -> Self {
        self.summary_sink = sink;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token that cancels every build this engine runs.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn compiler_for(&self, language: Language) -> Arc<dyn Compiler> {
        match language {
            Language::Jvm => Arc::clone(&self.jvm),
            Language::Native => Arc::clone(&self.native),
        }
    }
}

/// Result of building one target.
#[derive(Debug)]
pub struct TargetOutcome {
    pub result: ActionResult,
    /// The store dependents build against. `None` unless the build succeeded.
    pub providers: Option<Arc<ProviderStore>>,
    pub report: ActionReport,
    pub duration: Duration,
}

/// Build one target against the finalized stores of its dependencies.
///
/// Configuration problems are reported before anything runs, so no
/// dependency metadata is emitted for them. Everything after that is
/// captured in the outcome's report.
///
/// # Errors
/// Returns an error if a dependency has no store, the target's outputs are
/// inconsistent, or it enables an unknown post-processor.
pub fn run_target(
    target: &Target,
    stores: &DependencyStores,
    engine: &Engine,
) -> Result<TargetOutcome, EngineError> {
    let start = Instant::now();
    let label = target.label();

    let view = LocalView::resolve(target, stores)?;
    let request = BuildRequest::new(target, &view)?;
    let chain = engine.registry.chain(target.post_processors())?;

    let mut pipeline = ActionPipeline::new(
        for_language(target.language()),
        engine.compiler_for(target.language()),
        Arc::clone(&engine.dependency_sink),
    )
    .with_chain(chain)
    .with_cancellation(engine.cancel.clone());
    if let Some(sink) = &engine.summary_sink {
        pipeline = pipeline.with_summary_sink(Arc::clone(sink));
    }

    tracing::debug!(label = %label, language = %target.language(), "building target");
    let report = pipeline.run(&request);

    let providers = if report.result.is_success() {
        let local = local_providers(target, &report.source_units, &report.outputs);
        Some(assemble(target, stores, local)?)
    } else {
        None
    };

    tracing::debug!(label = %label, result = %report.result, "target finished");
    Ok(TargetOutcome {
        result: report.result,
        providers,
        report,
        duration: start.elapsed(),
    })
}

/// Build mutually independent targets concurrently.
///
/// Results come back in the order of `targets`. One target failing has no
/// effect on the others.
pub fn run_level(
    targets: &[Target],
    stores: &DependencyStores,
    engine: &Engine,
) -> Vec<Result<TargetOutcome, EngineError>> {
    targets
        .par_iter()
        .map(|target| run_target(target, stores, engine))
        .collect()
}
