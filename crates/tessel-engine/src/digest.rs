//! Content digests of the inputs a target was built against.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One resolved input and the SHA-256 of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub path: PathBuf,
    /// `None` if the file did not exist when the metadata was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl InputFile {
    /// Hash `path`. A missing file is recorded, not an error.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    pub fn hash(path: &Path) -> Result<Self, EngineError> {
        let sha256 = if path.is_file() {
            Some(tessel_util::hash::sha256_file(path)?)
        } else {
            None
        };
        Ok(Self {
            path: path.to_path_buf(),
            sha256,
        })
    }
}

/// A digest over an ordered list of inputs: paths and contents.
///
/// Order is significant; the same jars in a different classpath order
/// produce a different digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputDigest(String);

impl InputDigest {
    pub fn compute(inputs: &[InputFile]) -> Self {
        let rendered: Vec<String> = inputs
            .iter()
            .map(|i| {
                format!(
                    "{}\0{}",
                    i.path.display(),
                    i.sha256.as_deref().unwrap_or("-")
                )
            })
            .collect();
        let parts: Vec<&str> = rendered.iter().map(String::as_str).collect();
        Self(tessel_util::hash::sha256_multi(&parts))
    }

    /// Return the hex string representation of this digest.
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
