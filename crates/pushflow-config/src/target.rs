//! Target (api endpoint, token, org and space)

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const TARGET_FILE: &str = "target.json";

pub const API_VAR: &str = "PUSHFLOW_API";
pub const TOKEN_VAR: &str = "PUSHFLOW_TOKEN";
pub const ORG_VAR: &str = "PUSHFLOW_ORG";
pub const SPACE_VAR: &str = "PUSHFLOW_SPACE";

/// Where pushes go.
///
/// ```json
/// {
///   "api": "https://api.example.com",
///   "token": "bearer-token",
///   "org_guid": "…", "org_name": "acme",
///   "space_guid": "…", "space_name": "production"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub api: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub org_guid: Option<String>,
    #[serde(default)]
    pub org_name: Option<String>,
    #[serde(default)]
    pub space_guid: Option<String>,
    #[serde(default)]
    pub space_name: Option<String>,
}

impl TargetConfig {
    /// `~/.config/pushflow/target.json` overridden by the environment.
    pub fn load() -> Result<Self> {
        let path = dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join("pushflow")
            .join(TARGET_FILE);
        Self::load_from(&path)
    }

    /// Read `path` (a missing file counts as empty), then apply the
    /// `PUSHFLOW_*` environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.is_file() {
            tracing::debug!("Reading target file: {}", path.display());
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text).map_err(|source| ConfigError::TargetFile {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        if let Some(api) = var(API_VAR) {
            self.api = Some(api);
        }
        if let Some(token) = var(TOKEN_VAR) {
            self.token = Some(token);
        }
        if let Some(org) = var(ORG_VAR) {
            self.org_name = Some(org.clone());
            self.org_guid = Some(org);
        }
        if let Some(space) = var(SPACE_VAR) {
            self.space_name = Some(space.clone());
            self.space_guid = Some(space);
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::TargetFile {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text)?;
        Ok(path.to_path_buf())
    }

    /// Fails on the first field a real push cannot do without.
    pub fn require_complete(&self) -> Result<ResolvedTarget> {
        let api = self.api.clone().ok_or(ConfigError::MissingTarget("api"))?;
        let token = self.token.clone().ok_or(ConfigError::MissingTarget("token"))?;
        let org_guid = self
            .org_guid
            .clone()
            .ok_or(ConfigError::MissingTarget("org"))?;
        let space_guid = self
            .space_guid
            .clone()
            .ok_or(ConfigError::MissingTarget("space"))?;
        Ok(ResolvedTarget {
            api,
            token,
            org_name: self.org_name.clone().unwrap_or_else(|| org_guid.clone()),
            org_guid,
            space_name: self.space_name.clone().unwrap_or_else(|| space_guid.clone()),
            space_guid,
        })
    }
}

/// A target with every field present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub api: String,
    pub token: String,
    pub org_guid: String,
    pub org_name: String,
    pub space_guid: String,
    pub space_name: String,
}
