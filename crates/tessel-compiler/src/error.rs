//! Error types for tessel-compiler.

/// Errors that prevent the compiler from running.
#[derive(Debug, thiserror::Error)]
pub enum CompilerError {
    /// The compiler binary was not found.
    #[error("compiler `{program}` not found; install it or set `command` in tessel.toml")]
    NotFound { program: String },

    /// The compiler could not be started.
    #[error("cannot execute compiler `{program}`: {source}")]
    Exec {
        program: String,
        source: std::io::Error,
    },

    /// No source files provided.
    #[error("no source files specified")]
    NoSources,

    /// No output directory specified.
    #[error("no output directory specified")]
    NoOutput,

    /// A source path could not be made absolute.
    #[error("cannot resolve {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// An error propagated from tessel-util.
    #[error("{0}")]
    Util(#[from] tessel_util::error::UtilError),
}
