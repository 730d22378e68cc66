use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine-wide settings from `tessel.toml`.
///
/// Every field has a default, so a missing file or an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Root under which per-target intermediate directories are created when a
    /// target does not name one. Relative roots resolve against the working
    /// directory.
    #[serde(default = "default_intermediate_root")]
    pub intermediate_root: PathBuf,
    #[serde(default = "default_jvm")]
    pub jvm: CompilerSettings,
    #[serde(default = "default_native")]
    pub native: CompilerSettings,
}

/// How to run one language's compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerSettings {
    pub command: String,
    /// Passed verbatim before the source files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

fn default_intermediate_root() -> PathBuf {
    PathBuf::from(".tessel")
}

fn default_jvm() -> CompilerSettings {
    CompilerSettings {
        command: "javac".to_owned(),
        args: Vec::new(),
    }
}

fn default_native() -> CompilerSettings {
    CompilerSettings {
        command: "cc".to_owned(),
        args: Vec::new(),
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            intermediate_root: default_intermediate_root(),
            jvm: default_jvm(),
            native: default_native(),
        }
    }
}

impl EngineSettings {
    /// Read and parse a `tessel.toml` from the given path.
    /// Returns the defaults if the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or contains invalid TOML.
    pub fn from_path(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content).map_err(|e| SettingsError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Parse settings from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text is not valid settings TOML.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Render the settings as TOML.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self).map_err(|e| SettingsError::Serialize { source: e })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid tessel.toml at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("cannot serialize settings: {source}")]
    Serialize { source: toml::ser::Error },
}
