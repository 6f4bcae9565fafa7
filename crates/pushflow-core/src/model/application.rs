//! Application definition

use super::size::Megabytes;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A single application entry of a manifest.
///
/// ```yaml
/// applications:
/// - name: web
///   memory: 512M
///   instances: 2
///   buildpacks: [ruby_buildpack]
///   routes:
///   - route: web.example.com
///   env:
///     RACK_ENV: production
///   services:
///   - web-db
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Megabytes>,
    #[serde(default, rename = "disk_quota", skip_serializing_if = "Option::is_none")]
    pub disk_quota: Option<Megabytes>,
    /// Signed so that an invalid negative count survives parsing and is
    /// reported by validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buildpacks: Vec<String>,
    /// Deprecated singular form of `buildpacks`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildpack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<ManifestRoute>,
    #[serde(default, rename = "no-route", skip_serializing_if = "is_false")]
    pub no_route: bool,
    #[serde(default, rename = "random-route", skip_serializing_if = "is_false")]
    pub random_route: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, rename = "health-check-type", skip_serializing_if = "Option::is_none")]
    pub health_check_type: Option<HealthCheckType>,
    #[serde(
        default,
        rename = "health-check-http-endpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub health_check_http_endpoint: Option<String>,
    /// Seconds allowed between start and the first healthy check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessSpec>,
    /// Service instances to bind, by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    /// Prebuilt droplet to push instead of staging bits. Command line only.
    #[serde(skip)]
    pub droplet_path: Option<PathBuf>,
}

/// Buildpack names that mean "let the platform detect one"
pub const BUILDPACK_SENTINELS: [&str; 2] = ["default", "null"];

fn is_false(value: &bool) -> bool {
    !*value
}

impl Application {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_docker(&self) -> bool {
        self.docker.is_some()
    }

    /// Effective buildpack list, folding in the deprecated singular field.
    pub fn effective_buildpacks(&self) -> Vec<String> {
        if !self.buildpacks.is_empty() {
            return self.buildpacks.clone();
        }
        self.buildpack.iter().cloned().collect()
    }

    /// Buildpacks to ask the platform for.
    ///
    /// `None` leaves the current setting alone; an empty list requests
    /// auto-detection (`default` or `null` in the manifest).
    pub fn requested_buildpacks(&self) -> Option<Vec<String>> {
        let buildpacks = self.effective_buildpacks();
        if buildpacks.is_empty() {
            None
        } else if buildpacks
            .iter()
            .any(|b| BUILDPACK_SENTINELS.contains(&b.as_str()))
        {
            Some(Vec::new())
        } else {
            Some(buildpacks)
        }
    }

    pub fn route_strings(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.route.as_str())
    }

    /// Instance count as the platform expects it. Only meaningful after
    /// validation has rejected negative values.
    pub fn instance_count(&self) -> Option<u32> {
        self.instances.and_then(|n| u32::try_from(n).ok())
    }
}

/// `routes:` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRoute {
    pub route: String,
}

impl ManifestRoute {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
        }
    }
}

/// Docker image settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Never read from or written to a manifest; supplied through the
    /// environment.
    #[serde(skip)]
    pub password: Option<String>,
}

/// Additional process types (`web`, `worker`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    #[serde(rename = "type")]
    pub process_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Megabytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Health check type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    #[default]
    Port,
    Http,
    Process,
}

impl HealthCheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Port => "port",
            Self::Http => "http",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for HealthCheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthCheckType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "port" => Ok(Self::Port),
            "http" => Ok(Self::Http),
            // "none" is the legacy spelling of "process"
            "process" | "none" => Ok(Self::Process),
            _ => Err(ValidationError::UnknownValue {
                kind: "health check type".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_buildpacks_prefers_list() {
        let app = Application {
            buildpacks: vec!["ruby".into(), "node".into()],
            buildpack: Some("go".into()),
            ..Application::named("web")
        };
        assert_eq!(app.effective_buildpacks(), vec!["ruby", "node"]);

        let legacy = Application {
            buildpack: Some("go".into()),
            ..Application::named("web")
        };
        assert_eq!(legacy.effective_buildpacks(), vec!["go"]);
    }

    #[test]
    fn test_requested_buildpacks() {
        let mut app = Application::named("web");
        assert_eq!(app.requested_buildpacks(), None);

        app.buildpack = Some("java_buildpack".to_string());
        assert_eq!(
            app.requested_buildpacks(),
            Some(vec!["java_buildpack".to_string()])
        );

        app.buildpacks = vec!["default".to_string()];
        assert_eq!(app.requested_buildpacks(), Some(Vec::new()));
    }

    #[test]
    fn test_health_check_type_parse() {
        assert_eq!("HTTP".parse::<HealthCheckType>().unwrap(), HealthCheckType::Http);
        assert_eq!("none".parse::<HealthCheckType>().unwrap(), HealthCheckType::Process);
        assert!("tcp".parse::<HealthCheckType>().is_err());
    }

    #[test]
    fn test_negative_instances_have_no_count() {
        let app = Application {
            instances: Some(-1),
            ..Application::named("web")
        };
        assert_eq!(app.instance_count(), None);
    }
}
