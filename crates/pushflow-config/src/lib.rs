//! pushflow configuration
//!
//! Target settings, push timeouts and manifest discovery. Everything can
//! be overridden from the environment.

pub mod error;
pub mod settings;
pub mod target;

pub use error::*;
pub use settings::PushConfig;
pub use target::{ResolvedTarget, TargetConfig};

use std::path::{Path, PathBuf};

pub const MANIFEST_VAR: &str = "PUSHFLOW_MANIFEST";

/// pushflow's config directory (`~/.config/pushflow`), created on demand
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("pushflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Find the manifest for a push from `dir`.
///
/// Search order:
/// 1. `PUSHFLOW_MANIFEST` (must exist when set)
/// 2. `manifest.yml` in `dir`
/// 3. `manifest.yaml` in `dir`
///
/// `Ok(None)` means there is no manifest and the push is driven by flags
/// alone.
pub fn find_manifest(dir: &Path) -> Result<Option<PathBuf>> {
    if let Ok(manifest_path) = std::env::var(MANIFEST_VAR) {
        let path = PathBuf::from(manifest_path);
        if path.is_file() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ManifestNotFound(path));
    }

    let found = ["manifest.yml", "manifest.yaml"]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file());
    Ok(found)
}
