use std::path::PathBuf;

use tessel_compiler::{CompilationResult, CompileInvocation, Compiler};
use tessel_targets::Language;

use super::{prepare_common, LanguageBackend, Prepared};
use crate::error::EngineError;
use crate::request::BuildRequest;

/// Class directory in, jar-style archive out.
#[derive(Debug, Clone, Copy, Default)]
pub struct JvmBackend;

const SOURCE_EXTENSIONS: &[&str] = &["java"];

impl LanguageBackend for JvmBackend {
    fn language(&self) -> Language {
        Language::Jvm
    }

    fn prepare(&self, request: &BuildRequest) -> Result<Prepared, EngineError> {
        prepare_common(request, SOURCE_EXTENSIONS)
    }

    fn compile_sources(
        &self,
        compiler: &dyn Compiler,
        request: &BuildRequest,
        sources: &[PathBuf],
    ) -> Result<CompilationResult, EngineError> {
        let invocation = CompileInvocation {
            sources: sources.to_vec(),
            classpath: request.classpath.clone(),
            plugins: request.plugins.clone(),
            processors: request.processors.clone(),
            output_dir: request.output_dir.clone(),
            generated_sources_dir: request.generated_sources_dir.clone(),
            ..CompileInvocation::default()
        };
        Ok(compiler.compile(&invocation)?)
    }
}
