//! The compiler capability: a trait the build pipeline calls, a command-line
//! implementation, and diagnostics normalization.

pub mod command;
pub mod diagnostics;
pub mod error;

use std::path::PathBuf;

pub use command::{CommandCompiler, CompilerCommand, FlagStyle};
pub use diagnostics::{parse_diagnostics, Diagnostic, DiagnosticLevel};
pub use error::CompilerError;

/// Everything the compiler needs for one compilation of one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileInvocation {
    /// Source units, declared plus staged from source archives.
    pub sources: Vec<PathBuf>,
    /// Resolved link inputs from dependencies.
    pub classpath: Vec<PathBuf>,
    /// Header search directories (native targets).
    pub include_dirs: Vec<PathBuf>,
    /// Preprocessor defines (native targets).
    pub defines: Vec<String>,
    /// Compiler plugin archives.
    pub plugins: Vec<PathBuf>,
    /// Annotation processor class names.
    pub processors: Vec<String>,
    /// Directory that receives compiled outputs.
    pub output_dir: PathBuf,
    /// Directory that receives processor-generated sources.
    pub generated_sources_dir: Option<PathBuf>,
}

/// Result of a compilation invocation.
///
/// A failed compilation is a normal result, not an error: `success` is false
/// and the diagnostics say why.
#[derive(Debug, Clone, Default)]
pub struct CompilationResult {
    /// Whether compilation succeeded.
    pub success: bool,
    /// Parsed diagnostics from compiler output.
    pub diagnostics: Vec<Diagnostic>,
    /// Raw stdout from the compiler, unmodified.
    pub raw_stdout: String,
    /// Raw stderr from the compiler, unmodified.
    pub raw_stderr: String,
}

impl CompilationResult {
    /// Count the number of error-level diagnostics.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .count()
    }

    /// Count the number of warning-level diagnostics.
    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
            .count()
    }

    /// Format a human-readable summary of the compilation result.
    pub fn summary(&self) -> String {
        if self.success {
            let warnings = self.warning_count();
            if warnings > 0 {
                format!("compilation succeeded with {warnings} warning(s)")
            } else {
                "compilation succeeded".to_owned()
            }
        } else {
            let errors = self.error_count();
            format!("compilation failed with {errors} error(s)")
        }
    }
}

/// The opaque "compile these source units" capability.
pub trait Compiler: Send + Sync {
    /// Compile `invocation.sources` into `invocation.output_dir`.
    ///
    /// # Errors
    /// Returns an error only if the compiler could not be run at all. A
    /// compiler that ran and rejected the sources reports `success: false`.
    fn compile(&self, invocation: &CompileInvocation) -> Result<CompilationResult, CompilerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(level: DiagnosticLevel) -> Diagnostic {
        Diagnostic {
            level,
            message: "m".to_owned(),
            file: None,
            line: None,
        }
    }

    #[test]
    fn summary_success() {
        let result = CompilationResult {
            success: true,
            ..CompilationResult::default()
        };
        assert_eq!(result.summary(), "compilation succeeded");
    }

    #[test]
    fn summary_with_warnings() {
        let result = CompilationResult {
            success: true,
            diagnostics: vec![diag(DiagnosticLevel::Warning)],
            ..CompilationResult::default()
        };
        assert_eq!(result.summary(), "compilation succeeded with 1 warning(s)");
    }

    #[test]
    fn summary_failure_counts_errors_only() {
        let result = CompilationResult {
            success: false,
            diagnostics: vec![
                diag(DiagnosticLevel::Error),
                diag(DiagnosticLevel::Warning),
                diag(DiagnosticLevel::Error),
            ],
            ..CompilationResult::default()
        };
        assert_eq!(result.summary(), "compilation failed with 2 error(s)");
    }
}
