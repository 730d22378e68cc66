//! Error types for tessel-engine.

use tessel_util::error::UtilError;

use crate::provider::ProviderKind;

/// Errors produced while building one target. All of them are local to that
/// target; a failed target never poisons its siblings.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A filesystem operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] UtilError),

    /// The compiler could not be run at all.
    #[error("{0}")]
    Compiler(#[from] tessel_compiler::CompilerError),

    /// Assembling an output archive failed.
    #[error("cannot package {path}: {source}")]
    Packaging { path: String, source: UtilError },

    /// Reading or writing an aggregated side file failed.
    #[error("cannot aggregate `{entry}` into {output}: {source}")]
    Aggregation {
        entry: String,
        output: String,
        source: UtilError,
    },

    /// A post-processor failed; the rest of the chain did not run.
    #[error("post-processor `{processor}` failed: {message}")]
    PostProcess { processor: String, message: String },

    /// The target is declared inconsistently; nothing was built.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// A second provider of an already-present kind was added.
    #[error("target {label} already has a {kind} provider")]
    DuplicateProvider { label: String, kind: ProviderKind },

    /// A dependency has no provider store in the supplied mapping.
    #[error("target {label} depends on {dep}, but no provider store was supplied for it")]
    MissingDependencyStore { label: String, dep: String },

    /// The build was cancelled between steps.
    #[error("build of {label} was cancelled")]
    Cancelled { label: String },

    /// Metadata serialization/deserialization failed.
    #[error("cannot process metadata: {message}")]
    Metadata { message: String },
}
