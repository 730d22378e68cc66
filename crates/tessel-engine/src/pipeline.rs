//! The per-target action pipeline.
//!
//! Steps run in order and stop at the first failure: prepare, compile,
//! package, package generated sources, post-process. Whatever happens,
//! dependency metadata and the build summary are emitted exactly once per
//! attempt, including when a step panics.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessel_compiler::Compiler;

use crate::backend::LanguageBackend;
use crate::error::EngineError;
use crate::metadata::{BuildSummary, DependencySink, SummarySink};
use crate::postprocess::PostProcessorChain;
use crate::report::{ActionReport, ActionResult};
use crate::request::BuildRequest;

/// Shared flag checked between pipeline steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every pipeline sharing this token to stop at its next step boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One target's pipeline, wired to its collaborators.
pub struct ActionPipeline {
    backend: Box<dyn LanguageBackend>,
    compiler: Arc<dyn Compiler>,
    chain: PostProcessorChain,
    dependency_sink: Arc<dyn DependencySink>,
    summary_sink: Option<Arc<dyn SummarySink>>,
    cancel: CancellationToken,
}

impl ActionPipeline {
    pub fn new(
        backend: Box<dyn LanguageBackend>,
        compiler: Arc<dyn Compiler>,
        dependency_sink: Arc<dyn DependencySink>,
    ) -> Self {
        Self {
            backend,
            compiler,
            chain: PostProcessorChain::default(),
            dependency_sink,
            summary_sink: None,
            cancel: CancellationToken::default(),
        }
    }

    pub fn with_chain(mut self, chain: PostProcessorChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_summary_sink(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.summary_sink = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run every step for `request` and report what happened.
    ///
    /// Never returns an error: local failures land in
    /// [`ActionReport::failure`] with an [`ActionResult::Error`] result.
    pub fn run(&mut self, request: &BuildRequest) -> ActionReport {
        let mut guard = EmitGuard {
            request,
            dependency_sink: Arc::clone(&self.dependency_sink),
            summary_sink: self.summary_sink.clone(),
            report: Some(ActionReport::new(request.label.clone())),
        };

        if let Some(report) = guard.report.as_mut() {
            if let Err(e) = self.steps(request, report) {
                tracing::debug!(label = %request.label, error = %e, "pipeline failed");
                report.result = ActionResult::Error;
                report.failure = Some(e);
            }
        }

        guard.finish()
    }

    fn checkpoint(&self, request: &BuildRequest, step: &str) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            tracing::info!(label = %request.label, step, "cancelled");
            return Err(EngineError::Cancelled {
                label: request.label.to_string(),
            });
        }
        tracing::trace!(label = %request.label, step, "entering step");
        Ok(())
    }

    /// Delete every declared output so a failed or skipped attempt cannot
    /// leave an earlier attempt's archives behind.
    fn remove_previous_outputs(&self, request: &BuildRequest) -> Result<(), EngineError> {
        let declared = std::iter::once(request.primary_output.clone())
            .chain(request.generated_sources_output.clone())
            .chain(self.chain.declared_outputs(request));
        for path in declared {
            if tessel_util::fs::remove_file_if_exists(&path)? {
                tracing::debug!(label = %request.label, path = %path.display(), "removed previous output");
            }
        }
        Ok(())
    }

    fn steps(&mut self, request: &BuildRequest, report: &mut ActionReport) -> Result<(), EngineError> {
        self.checkpoint(request, "prepare")?;
        self.remove_previous_outputs(request)?;
        let prepared = self.backend.prepare(request)?;
        report.outputs.side_files = prepared.side_files;
        report.source_units.clone_from(&prepared.sources);

        self.checkpoint(request, "compile")?;
        if prepared.sources.is_empty() {
            tracing::debug!(label = %request.label, "no source units, compiler not invoked");
        } else {
            eprintln!(
                "    Compiling {} ({} source{})",
                request.label,
                prepared.sources.len(),
                if prepared.sources.len() == 1 { "" } else { "s" }
            );
            let compilation =
                self.backend
                    .compile_sources(self.compiler.as_ref(), request, &prepared.sources)?;
            let success = compilation.success;
            report.compilation = Some(compilation);
            if !success {
                report.result = ActionResult::Error;
                return Ok(());
            }
        }

        self.checkpoint(request, "package")?;
        let primary = self.backend.build_primary_artifact(request)?;
        if primary.is_none() && prepared.sources.is_empty() {
            tracing::debug!(label = %request.label, "nothing to package");
            report.result = ActionResult::Skipped;
            return Ok(());
        }
        report.outputs.primary = primary;

        if !request.processors.is_empty() && request.generated_sources_output.is_some() {
            self.checkpoint(request, "package-generated-sources")?;
            report.outputs.generated_sources =
                self.backend.build_generated_sources_artifact(request)?;
        }

        self.checkpoint(request, "post-process")?;
        report.outputs.post_processed = self.chain.run(request, &report.outputs)?;

        report.result = ActionResult::Ok;
        Ok(())
    }
}

/// Emits metadata for one attempt when finished or dropped, whichever comes
/// first.
struct EmitGuard<'a> {
    request: &'a BuildRequest,
    dependency_sink: Arc<dyn DependencySink>,
    summary_sink: Option<Arc<dyn SummarySink>>,
    /// `None` once emitted.
    report: Option<ActionReport>,
}

impl EmitGuard<'_> {
    fn resolved_inputs(&self) -> &[PathBuf] {
        &self.request.classpath
    }

    /// Emit for a pipeline that ran to completion and hand back its report.
    ///
    /// A metadata failure becomes the attempt's failure unless it already
    /// has one.
    fn finish(mut self) -> ActionReport {
        let mut report = self
            .report
            .take()
            .unwrap_or_else(|| ActionReport::new(self.request.label.clone()));

        let success = report.result.is_success();
        let emitted = self
            .dependency_sink
            .emit(self.request, self.resolved_inputs(), success);
        if let Err(e) = emitted {
            tracing::warn!(label = %self.request.label, error = %e, "dependency metadata not written");
            if report.failure.is_none() {
                report.result = ActionResult::Error;
                report.failure = Some(e);
            }
        }

        if let Some(sink) = &self.summary_sink {
            let summary = BuildSummary::from_report(self.request, &report);
            if let Err(e) = sink.emit_summary(self.request, &summary) {
                tracing::warn!(label = %self.request.label, error = %e, "build summary not written");
                if report.failure.is_none() {
                    report.result = ActionResult::Error;
                    report.failure = Some(e);
                }
            }
        }

        report
    }
}

impl Drop for EmitGuard<'_> {
    fn drop(&mut self) {
        let Some(report) = self.report.take() else {
            return;
        };
        // Only reached when a step unwound past `run`.
        if let Err(e) = self
            .dependency_sink
            .emit(self.request, self.resolved_inputs(), false)
        {
            tracing::error!(label = %self.request.label, error = %e, "dependency metadata not written");
        }
        if let Some(sink) = &self.summary_sink {
            let mut summary = BuildSummary::from_report(self.request, &report);
            summary.result = ActionResult::Error;
            summary.failure = Some("build step panicked".to_owned());
            if let Err(e) = sink.emit_summary(self.request, &summary) {
                tracing::error!(label = %self.request.label, error = %e, "build summary not written");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use tessel_targets::{Language, Outputs, Target};
    use tessel_util::archive::ArchiveWriter;

    use super::*;
    use crate::assemble::LocalView;
    use crate::backend::{for_language, JvmBackend};
    use crate::postprocess::{PostProcessor, PostProcessorRegistry};
    use crate::report::ProducedOutputs;
    use crate::testing::{jvm_target, label, source, Behavior, FakeCompiler, RecordingSink};

    struct Fixture {
        compiler: Arc<FakeCompiler>,
        sink: Arc<RecordingSink>,
    }

    impl Fixture {
        fn new(behavior: Behavior) -> Self {
            Self {
                compiler: Arc::new(FakeCompiler::new(behavior)),
                sink: Arc::new(RecordingSink::default()),
            }
        }

        fn pipeline(&self, language: Language) -> ActionPipeline {
            ActionPipeline::new(
                for_language(language),
                self.compiler.clone(),
                self.sink.clone(),
            )
            .with_summary_sink(self.sink.clone())
        }

        fn summaries(&self) -> usize {
            self.sink.summaries.lock().unwrap().len()
        }
    }

    fn request_for(target: &Target) -> BuildRequest {
        BuildRequest::new(target, &LocalView::default()).unwrap()
    }

    #[test]
    fn successful_build_packages_and_emits_once() {
        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .build()
            .unwrap();
        let mut request = request_for(&target);
        request.classpath = vec![tmp.path().join("dep.jar")];
        let fx = Fixture::new(Behavior::Succeed);

        let report = fx.pipeline(Language::Jvm).run(&request);

        assert_eq!(report.result, ActionResult::Ok);
        assert!(report.failure.is_none());
        assert!(report.compiler_invoked());
        assert_eq!(report.source_units, vec![tmp.path().join("src/A.java")]);
        let primary = report.outputs.primary.clone().unwrap();
        assert_eq!(
            tessel_util::archive::list_entries(&primary).unwrap(),
            vec!["A.out".to_owned()]
        );
        assert_eq!(fx.sink.emission_count(), 1);
        let emission = fx.sink.last();
        assert!(emission.success);
        assert_eq!(emission.inputs, vec![tmp.path().join("dep.jar")]);
        assert_eq!(fx.summaries(), 1);
    }

    #[test]
    fn zero_sources_never_invoke_the_compiler() {
        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:exports")
            .dep(label("//pkg:dep"))
            .build()
            .unwrap();
        let fx = Fixture::new(Behavior::Fail);

        let report = fx.pipeline(Language::Jvm).run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Skipped);
        assert!(report.result.is_success());
        assert!(!report.compiler_invoked());
        assert_eq!(fx.compiler.calls(), 0);
        assert!(report.outputs.primary.is_none());
        assert_eq!(fx.sink.emission_count(), 1);
        assert!(fx.sink.last().success);
    }

    #[test]
    fn zero_sources_with_side_files_still_package() {
        let tmp = tempfile::tempdir().unwrap();
        let srcjar = tmp.path().join("proto.srcjar");
        let mut writer = ArchiveWriter::new();
        writer.add_bytes("protobuf.meta", b"meta".to_vec());
        writer.write(&srcjar).unwrap();
        let target = jvm_target(tmp.path(), "//pkg:proto")
            .source_archive(&srcjar)
            .aggregation(tessel_targets::Aggregation {
                entry: "protobuf.meta".to_owned(),
                output: None,
            })
            .build()
            .unwrap();
        let fx = Fixture::new(Behavior::Succeed);

        let report = fx.pipeline(Language::Jvm).run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Ok);
        assert_eq!(fx.compiler.calls(), 0);
        let primary = report.outputs.primary.unwrap();
        assert_eq!(
            tessel_util::archive::read_entry(&primary, "protobuf.meta").unwrap(),
            Some(b"meta".to_vec())
        );
        assert_eq!(report.outputs.side_files.len(), 1);
    }

    #[test]
    fn compile_error_is_reported_verbatim_and_emits_once() {
        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .post_processor("checksum")
            .build()
            .unwrap();
        let fx = Fixture::new(Behavior::Fail);
        let chain = PostProcessorRegistry::builtin()
            .chain(target.post_processors())
            .unwrap();

        let report = fx
            .pipeline(Language::Jvm)
            .with_chain(chain)
            .run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Error);
        assert!(report.failure.is_none());
        assert_eq!(report.diagnostics().len(), 1);
        assert_eq!(
            report.compilation.as_ref().unwrap().raw_stderr,
            "A.java:3: error: cannot find symbol\n"
        );
        assert!(report.outputs.primary.is_none());
        assert!(report.outputs.post_processed.is_empty());
        assert_eq!(fx.sink.emission_count(), 1);
        assert!(!fx.sink.last().success);
    }

    #[test]
    fn compiler_that_cannot_run_fails_the_target() {
        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .build()
            .unwrap();
        let fx = Fixture::new(Behavior::Unavailable);

        let report = fx.pipeline(Language::Jvm).run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Error);
        assert!(matches!(report.failure, Some(EngineError::Compiler(_))));
        assert_eq!(fx.sink.emission_count(), 1);
    }

    #[test]
    fn packaging_error_emits_once() {
        let tmp = tempfile::tempdir().unwrap();
        // The primary output's parent is a file, so the archive cannot be written.
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let target = Target::builder(
            label("//pkg:lib"),
            Language::Jvm,
            Outputs {
                primary: blocker.join("lib.jar"),
                generated_sources: None,
                intermediate_dir: tmp.path().join("tmp"),
            },
        )
        .source(source(tmp.path(), "A.java"))
        .build()
        .unwrap();
        let fx = Fixture::new(Behavior::Succeed);

        let report = fx.pipeline(Language::Jvm).run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Error);
        assert!(matches!(report.failure, Some(EngineError::Packaging { .. })));
        assert_eq!(fx.sink.emission_count(), 1);
        assert!(!fx.sink.last().success);
    }

    #[test]
    fn post_process_error_emits_once() {
        struct Broken;
        impl PostProcessor for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn initialize(&mut self, _: &BuildRequest, _: &ProducedOutputs) -> Result<(), EngineError> {
                Ok(())
            }
            fn process(&mut self) -> Result<Vec<PathBuf>, EngineError> {
                Err(EngineError::Metadata {
                    message: "disk full".to_owned(),
                })
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .build()
            .unwrap();
        let fx = Fixture::new(Behavior::Succeed);

        let report = fx
            .pipeline(Language::Jvm)
            .with_chain(PostProcessorChain::new(vec![Box::new(Broken)]))
            .run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Error);
        assert!(matches!(
            report.failure,
            Some(EngineError::PostProcess { ref processor, .. }) if processor == "broken"
        ));
        // Packaging happened before the chain failed.
        assert!(report.outputs.primary.is_some());
        assert_eq!(fx.sink.emission_count(), 1);
        assert!(!fx.sink.last().success);
    }

    #[test]
    fn cancellation_stops_before_compiling_and_emits_once() {
        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .build()
            .unwrap();
        let fx = Fixture::new(Behavior::Succeed);
        let token = CancellationToken::new();
        token.cancel();

        let report = fx
            .pipeline(Language::Jvm)
            .with_cancellation(token)
            .run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Error);
        assert!(matches!(report.failure, Some(EngineError::Cancelled { .. })));
        assert_eq!(fx.compiler.calls(), 0);
        assert_eq!(fx.sink.emission_count(), 1);
    }

    #[test]
    fn panic_in_compiler_still_emits_once() {
        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .build()
            .unwrap();
        let request = request_for(&target);
        let fx = Fixture::new(Behavior::Panic);
        let mut pipeline = fx.pipeline(Language::Jvm);

        let outcome = catch_unwind(AssertUnwindSafe(|| pipeline.run(&request)));

        assert!(outcome.is_err());
        assert_eq!(fx.sink.emission_count(), 1);
        assert!(!fx.sink.last().success);
        let summaries = fx.sink.summaries.lock().unwrap();
        let summary = summaries.first().unwrap();
        assert_eq!(summary.result, ActionResult::Error);
        assert_eq!(summary.failure.as_deref(), Some("build step panicked"));
    }

    #[test]
    fn failing_sink_becomes_the_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .build()
            .unwrap();
        let sink = Arc::new(RecordingSink::failing());
        let mut pipeline = ActionPipeline::new(
            Box::new(JvmBackend),
            Arc::new(FakeCompiler::new(Behavior::Succeed)),
            sink.clone(),
        );

        let report = pipeline.run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Error);
        assert!(matches!(report.failure, Some(EngineError::Metadata { .. })));
        assert_eq!(sink.emission_count(), 1);
    }

    #[test]
    fn generated_sources_packaged_when_declared() {
        let tmp = tempfile::tempdir().unwrap();
        let gensrc = tmp.path().join("out/lib-gensrc.jar");
        let target = Target::builder(
            label("//pkg:lib"),
            Language::Jvm,
            Outputs {
                primary: tmp.path().join("out/lib.jar"),
                generated_sources: Some(gensrc.clone()),
                intermediate_dir: tmp.path().join("tmp"),
            },
        )
        .source(source(tmp.path(), "A.java"))
        .processor("com.example.AutoValueProcessor")
        .build()
        .unwrap();
        let fx = Fixture::new(Behavior::Succeed);

        let report = fx.pipeline(Language::Jvm).run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Ok);
        assert_eq!(report.outputs.generated_sources, Some(gensrc.clone()));
        assert_eq!(
            tessel_util::archive::list_entries(&gensrc).unwrap(),
            vec!["Generated.java".to_owned()]
        );
    }

    #[test]
    fn post_processors_run_after_packaging() {
        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .post_processor("checksum")
            .build()
            .unwrap();
        let fx = Fixture::new(Behavior::Succeed);
        let chain = PostProcessorRegistry::builtin()
            .chain(target.post_processors())
            .unwrap();

        let report = fx
            .pipeline(Language::Jvm)
            .with_chain(chain)
            .run(&request_for(&target));

        assert_eq!(report.result, ActionResult::Ok);
        assert_eq!(
            report.outputs.post_processed,
            vec![tmp.path().join("out/lib.jar.sha256")]
        );
    }

    fn run_with_chain(target: &Target, behavior: Behavior) -> ActionReport {
        let chain = PostProcessorRegistry::builtin()
            .chain(target.post_processors())
            .unwrap();
        Fixture::new(behavior)
            .pipeline(Language::Jvm)
            .with_chain(chain)
            .run(&request_for(target))
    }

    #[test]
    fn failed_attempt_removes_previous_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let target = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .post_processors(["checksum".to_owned(), "fully_linked".to_owned()])
            .build()
            .unwrap();
        let primary = tmp.path().join("out/lib.jar");
        let checksum = tmp.path().join("out/lib.jar.sha256");
        let linked = tmp.path().join("out/lib_fully_linked.jar");

        let first = run_with_chain(&target, Behavior::Succeed);
        assert_eq!(first.result, ActionResult::Ok);
        assert!(primary.is_file() && checksum.is_file() && linked.is_file());

        let second = run_with_chain(&target, Behavior::Fail);
        assert_eq!(second.result, ActionResult::Error);
        assert!(!primary.exists());
        assert!(!checksum.exists());
        assert!(!linked.exists());
    }

    #[test]
    fn skipped_attempt_removes_previous_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let built = jvm_target(tmp.path(), "//pkg:lib")
            .source(source(tmp.path(), "A.java"))
            .post_processor("checksum")
            .build()
            .unwrap();
        assert_eq!(run_with_chain(&built, Behavior::Succeed).result, ActionResult::Ok);

        // Same outputs, sources since removed.
        let emptied = jvm_target(tmp.path(), "//pkg:lib")
            .post_processor("checksum")
            .build()
            .unwrap();
        let report = run_with_chain(&emptied, Behavior::Succeed);

        assert_eq!(report.result, ActionResult::Skipped);
        assert!(!tmp.path().join("out/lib.jar").exists());
        assert!(!tmp.path().join("out/lib.jar.sha256").exists());
    }
}
