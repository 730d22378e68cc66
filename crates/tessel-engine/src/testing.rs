//! Test doubles shared by the engine's unit tests.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tessel_compiler::{
    CompilationResult, CompileInvocation, Compiler, CompilerError, Diagnostic, DiagnosticLevel,
};
use tessel_targets::{Label, Language, Outputs, Target, TargetBuilder};

use crate::error::EngineError;
use crate::metadata::{BuildSummary, DependencySink, SummarySink};
use crate::request::BuildRequest;

/// What a [`FakeCompiler`] does when asked to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Write one output per source, and one generated source if a gensrc
    /// directory was given.
    Succeed,
    /// Report a failed compilation with one error diagnostic.
    Fail,
    /// Report success without writing anything.
    SucceedEmpty,
    /// Fail to run at all.
    Unavailable,
    /// Panic inside the compiler.
    Panic,
}

pub struct FakeCompiler {
    behavior: Behavior,
    pub invocations: Mutex<Vec<CompileInvocation>>,
}

impl FakeCompiler {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

impl Compiler for FakeCompiler {
    fn compile(&self, invocation: &CompileInvocation) -> Result<CompilationResult, CompilerError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        match self.behavior {
            Behavior::Succeed => {
                std::fs::create_dir_all(&invocation.output_dir).unwrap();
                for source in &invocation.sources {
                    let stem = source.file_stem().unwrap().to_string_lossy();
                    std::fs::write(invocation.output_dir.join(format!("{stem}.out")), b"out")
                        .unwrap();
                }
                if let Some(gensrc) = &invocation.generated_sources_dir {
                    std::fs::create_dir_all(gensrc).unwrap();
                    std::fs::write(gensrc.join("Generated.java"), b"class Generated {}").unwrap();
                }
                Ok(CompilationResult {
                    success: true,
                    ..CompilationResult::default()
                })
            }
            Behavior::SucceedEmpty => Ok(CompilationResult {
                success: true,
                ..CompilationResult::default()
            }),
            Behavior::Fail => Ok(CompilationResult {
                success: false,
                diagnostics: vec![Diagnostic {
                    level: DiagnosticLevel::Error,
                    message: "cannot find symbol".to_owned(),
                    file: Some("A.java".to_owned()),
                    line: Some(3),
                }],
                raw_stdout: String::new(),
                raw_stderr: "A.java:3: error: cannot find symbol\n".to_owned(),
            }),
            Behavior::Unavailable => Err(CompilerError::NotFound {
                program: "fakec".to_owned(),
            }),
            Behavior::Panic => panic!("compiler crashed"),
        }
    }
}

/// One recorded dependency-metadata emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub label: Label,
    pub inputs: Vec<PathBuf>,
    pub success: bool,
}

#[derive(Default)]
pub struct RecordingSink {
    pub emissions: Mutex<Vec<Emission>>,
    pub summaries: Mutex<Vec<BuildSummary>>,
    pub fail_emit: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail_emit: true,
            ..Self::default()
        }
    }

    pub fn emission_count(&self) -> usize {
        self.emissions.lock().unwrap().len()
    }

    pub fn last(&self) -> Emission {
        self.emissions.lock().unwrap().last().cloned().unwrap()
    }
}

impl DependencySink for RecordingSink {
    fn emit(
        &self,
        request: &BuildRequest,
        resolved_inputs: &[PathBuf],
        success: bool,
    ) -> Result<(), EngineError> {
        self.emissions.lock().unwrap().push(Emission {
            label: request.label.clone(),
            inputs: resolved_inputs.to_vec(),
            success,
        });
        if self.fail_emit {
            return Err(EngineError::Metadata {
                message: "sink unavailable".to_owned(),
            });
        }
        Ok(())
    }
}

impl SummarySink for RecordingSink {
    fn emit_summary(&self, _request: &BuildRequest, summary: &BuildSummary) -> Result<(), EngineError> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

/// Counts how many times it was run.
#[derive(Default)]
pub struct Counter(pub AtomicUsize);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn label(s: &str) -> Label {
    Label::parse(s).unwrap()
}

/// A JVM target rooted at `root`, with `out/<name>.jar` as primary output.
pub fn jvm_target(root: &Path, name: &str) -> TargetBuilder {
    target(root, name, Language::Jvm)
}

pub fn target(root: &Path, name: &str, language: Language) -> TargetBuilder {
    let label = label(name);
    let stem = label.name().to_owned();
    Target::builder(
        label,
        language,
        Outputs {
            primary: root.join("out").join(format!("{stem}.jar")),
            generated_sources: None,
            intermediate_dir: root.join("tmp").join(&stem),
        },
    )
}

/// Write a source file under `root` and return its path.
pub fn source(root: &Path, name: &str) -> PathBuf {
    let path = root.join("src").join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"class X {}").unwrap();
    path
}
