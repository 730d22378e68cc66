//! Error types for tessel-util.

/// Errors produced by utility functions.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// An I/O operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A glob pattern was invalid.
    #[error("invalid glob pattern `{pattern}`: {message}")]
    GlobPattern { pattern: String, message: String },

    /// A command failed to execute.
    #[error("cannot execute command: {source}")]
    CommandExec { source: std::io::Error },

    /// An archive could not be read or written.
    #[error("cannot process archive {path}: {message}")]
    Archive { path: String, message: String },

    /// An archive entry attempted to escape the extraction directory.
    #[error("archive contains path traversal entry \"{entry_path}\" that escapes {dest}")]
    PathTraversal { entry_path: String, dest: String },
}
