//! Parse and validate `TARGET.toml` declarations and `tessel.toml` settings.

pub mod manifest;
pub mod settings;

pub use manifest::{ManifestError, TargetManifest};
pub use settings::{CompilerSettings, EngineSettings, SettingsError};
