use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tessel_compiler::{CompilationResult, CompileInvocation, Compiler};
use tessel_targets::Language;

use super::{prepare_common, LanguageBackend, Prepared};
use crate::error::EngineError;
use crate::provider::extend_unique;
use crate::request::BuildRequest;

/// Object directory in, static-library-style archive out. Public headers are
/// staged into the intermediate include directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx"];

impl NativeBackend {
    fn stage_headers(request: &BuildRequest) -> Result<(), EngineError> {
        tessel_util::fs::remove_dir_all_if_exists(&request.include_dir)?;
        tessel_util::fs::ensure_dir(&request.include_dir)?;
        for header in &request.headers {
            let Some(name) = header.file_name() else {
                continue;
            };
            tessel_util::fs::materialize(header, &request.include_dir.join(name))?;
        }
        Ok(())
    }

    /// Objects land flat in the output directory as `<stem>.o`, so two units
    /// with one stem would overwrite each other.
    fn check_object_names(request: &BuildRequest, sources: &[PathBuf]) -> Result<(), EngineError> {
        let mut seen: HashMap<&OsStr, &PathBuf> = HashMap::new();
        for source in sources {
            let Some(stem) = source.file_stem() else {
                continue;
            };
            if let Some(first) = seen.insert(stem, source) {
                return Err(EngineError::Configuration {
                    message: format!(
                        "{}: {} and {} would both compile to `{}.o`",
                        request.label,
                        first.display(),
                        source.display(),
                        stem.to_string_lossy()
                    ),
                });
            }
        }
        Ok(())
    }

    /// The staged include directory, then the directory of every visible
    /// dependency header.
    fn include_dirs(request: &BuildRequest) -> Vec<PathBuf> {
        let mut dirs = vec![request.include_dir.clone()];
        let parents: Vec<PathBuf> = request
            .visible_headers
            .iter()
            .filter(|h| !request.headers.contains(h))
            .filter_map(|h| h.parent().map(Path::to_path_buf))
            .collect();
        extend_unique(&mut dirs, &parents);
        dirs
    }
}

impl LanguageBackend for NativeBackend {
    fn language(&self) -> Language {
        Language::Native
    }

    fn prepare(&self, request: &BuildRequest) -> Result<Prepared, EngineError> {
        let prepared = prepare_common(request, SOURCE_EXTENSIONS)?;
        Self::stage_headers(request)?;
        Ok(prepared)
    }

    fn compile_sources(
        &self,
        compiler: &dyn Compiler,
        request: &BuildRequest,
        sources: &[PathBuf],
    ) -> Result<CompilationResult, EngineError> {
        Self::check_object_names(request, sources)?;
        let invocation = CompileInvocation {
            sources: sources.to_vec(),
            include_dirs: Self::include_dirs(request),
            defines: request.defines.clone(),
            plugins: request.plugins.clone(),
            output_dir: request.output_dir.clone(),
            ..CompileInvocation::default()
        };
        Ok(compiler.compile(&invocation)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::assemble::LocalView;
    use crate::testing::{source, target, Behavior, FakeCompiler};
    use tessel_util::archive::ArchiveWriter;

    #[test]
    fn stages_public_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let header = tmp.path().join("src/include/util.h");
        std::fs::create_dir_all(header.parent().unwrap()).unwrap();
        std::fs::write(&header, b"int util(void);").unwrap();

        let t = target(tmp.path(), "//native:util", Language::Native)
            .headers([header.clone()])
            .build()
            .unwrap();
        let request = BuildRequest::new(&t, &LocalView::default()).unwrap();

        NativeBackend.prepare(&request).unwrap();
        assert_eq!(
            std::fs::read(request.include_dir.join("util.h")).unwrap(),
            b"int util(void);"
        );
    }

    #[test]
    fn include_dirs_cover_dependency_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let t = target(tmp.path(), "//native:app", Language::Native)
            .defines(["NDEBUG".to_owned()])
            .build()
            .unwrap();
        let view = LocalView {
            visible_headers: vec![
                PathBuf::from("dep/a/a.h"),
                PathBuf::from("dep/a/b.h"),
                PathBuf::from("dep/c/c.h"),
            ],
            ..LocalView::default()
        };
        let request = BuildRequest::new(&t, &view).unwrap();
        let compiler = FakeCompiler::new(Behavior::SucceedEmpty);

        NativeBackend
            .compile_sources(&compiler, &request, &[PathBuf::from("main.c")])
            .unwrap();

        let invocations = compiler.invocations.lock().unwrap();
        let invocation = invocations.first().unwrap();
        assert_eq!(
            invocation.include_dirs,
            vec![
                request.include_dir.clone(),
                PathBuf::from("dep/a"),
                PathBuf::from("dep/c"),
            ]
        );
        assert_eq!(invocation.defines, vec!["NDEBUG".to_owned()]);
        assert!(invocation.classpath.is_empty());
    }

    #[test]
    fn staged_source_colliding_with_declared_source_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let srcjar = tmp.path().join("gen.srcjar");
        let mut writer = ArchiveWriter::new();
        writer.add_bytes("gen/main.c", b"int main(void) { return 0; }".to_vec());
        writer.write(&srcjar).unwrap();

        let t = target(tmp.path(), "//native:app", Language::Native)
            .source(source(tmp.path(), "main.c"))
            .source_archive(&srcjar)
            .build()
            .unwrap();
        let request = BuildRequest::new(&t, &LocalView::default()).unwrap();
        let prepared = NativeBackend.prepare(&request).unwrap();
        assert_eq!(prepared.sources.len(), 2);

        let compiler = FakeCompiler::new(Behavior::Succeed);
        let err = NativeBackend
            .compile_sources(&compiler, &request, &prepared.sources)
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
        assert!(err.to_string().contains("main.o"));
        assert_eq!(compiler.calls(), 0);
    }
}
