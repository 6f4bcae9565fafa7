//! Command-line overrides

use super::application::HealthCheckType;
use super::size::Megabytes;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Deployment strategy for updating a running application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStrategy {
    /// Stop everything, then start the new version.
    #[default]
    None,
    /// Replace instances one batch at a time.
    Rolling,
    /// Start a single canary instance and wait for promotion.
    Canary,
}

impl DeploymentStrategy {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rolling => "rolling",
            Self::Canary => "canary",
        }
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "rolling" => Ok(Self::Rolling),
            "canary" => Ok(Self::Canary),
            _ => Err(ValidationError::UnknownValue {
                kind: "deployment strategy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Sparse set of overrides given on the command line.
///
/// Every `None`/empty/`false` field means "not given"; the manifest value
/// (or the platform default) is used instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagOverrides {
    /// Restrict the push to this application (or name the only one).
    pub app_name: Option<String>,
    pub buildpacks: Vec<String>,
    pub stack: Option<String>,
    pub no_route: bool,
    pub random_route: bool,
    /// Signed so that `-1` can be represented and rejected.
    pub instances: Option<i64>,
    pub memory: Option<Megabytes>,
    pub disk: Option<Megabytes>,
    pub strategy: DeploymentStrategy,
    pub no_start: bool,
    pub docker_image: Option<String>,
    pub docker_username: Option<String>,
    /// Read from the environment, never from a flag.
    pub docker_password: Option<String>,
    pub health_check_type: Option<HealthCheckType>,
    pub health_check_endpoint: Option<String>,
    pub health_check_timeout: Option<u32>,
    pub path: Option<PathBuf>,
    /// Prebuilt droplet archive to push in place of app bits.
    pub droplet_path: Option<PathBuf>,
    pub start_command: Option<String>,
    /// `((name))` substitutions applied when the manifest is read.
    pub vars: HashMap<String, String>,
}

impl FlagOverrides {
    pub fn for_app(name: impl Into<String>) -> Self {
        Self {
            app_name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Flags given that only make sense for a single application.
    pub fn single_app_flags(&self) -> Vec<String> {
        let checks: [(&str, bool); 15] = [
            ("--buildpack", !self.buildpacks.is_empty()),
            ("--stack", self.stack.is_some()),
            ("--no-route", self.no_route),
            ("--random-route", self.random_route),
            ("--instances", self.instances.is_some()),
            ("--memory", self.memory.is_some()),
            ("--disk", self.disk.is_some()),
            ("--docker-image", self.docker_image.is_some()),
            ("--docker-username", self.docker_username.is_some()),
            ("--health-check-type", self.health_check_type.is_some()),
            ("--endpoint", self.health_check_endpoint.is_some()),
            ("--app-start-timeout", self.health_check_timeout.is_some()),
            ("--path", self.path.is_some()),
            ("--droplet", self.droplet_path.is_some()),
            ("--start-command", self.start_command.is_some()),
        ];
        checks
            .into_iter()
            .filter(|(_, set)| *set)
            .map(|(flag, _)| flag.to_string())
            .collect()
    }

    pub fn has_scale_overrides(&self) -> bool {
        self.instances.is_some() || self.memory.is_some() || self.disk.is_some()
    }

    /// Names of the scale flags that were given.
    pub fn scale_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.instances.is_some() {
            flags.push("instances".to_string());
        }
        if self.memory.is_some() {
            flags.push("memory".to_string());
        }
        if self.disk.is_some() {
            flags.push("disk".to_string());
        }
        flags
    }
}
