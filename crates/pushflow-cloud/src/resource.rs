//! Resource types exchanged with the control plane

use pushflow_core::HealthCheckType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Org and space a push is aimed at. Read-only once resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub org_guid: String,
    pub org_name: String,
    pub space_guid: String,
    pub space_name: String,
}

impl Target {
    pub fn new(
        org_guid: impl Into<String>,
        org_name: impl Into<String>,
        space_guid: impl Into<String>,
        space_name: impl Into<String>,
    ) -> Self {
        Self {
            org_guid: org_guid.into(),
            org_name: org_name.into(),
            space_guid: space_guid.into(),
            space_name: space_name.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "org {} / space {}", self.org_name, self.space_name)
    }
}

/// Desired state of an application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppState {
    #[default]
    Stopped,
    Started,
}

/// How an application is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Lifecycle {
    Buildpack {
        #[serde(default)]
        buildpacks: Vec<String>,
        #[serde(default)]
        stack: Option<String>,
    },
    Docker {
        image: String,
    },
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::Buildpack {
            buildpacks: Vec::new(),
            stack: None,
        }
    }
}

impl Lifecycle {
    pub fn is_docker(&self) -> bool {
        matches!(self, Lifecycle::Docker { .. })
    }
}

/// An application as the control plane currently knows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteApp {
    pub guid: String,
    pub name: String,
    pub state: AppState,
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Web process scale
    pub instances: u32,
    pub memory_mb: Option<u64>,
    pub disk_mb: Option<u64>,

    pub health_check_type: Option<HealthCheckType>,
    pub health_check_endpoint: Option<String>,
    pub health_check_timeout: Option<u32>,
    pub command: Option<String>,

    pub current_droplet: Option<String>,
    /// SHA-256 of the bits package the current droplet was staged from
    pub staged_checksum: Option<String>,
    /// Docker image the current droplet was staged from
    pub staged_image: Option<String>,
    /// SHA-256 of the current droplet itself
    pub droplet_checksum: Option<String>,

    /// Routes mapped to the app
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Names of the service instances bound to the app
    #[serde(default)]
    pub services: Vec<String>,

    /// Guid of a rolling/canary deployment that has not finished yet
    pub active_deployment: Option<String>,
}

impl RemoteApp {
    pub fn is_started(&self) -> bool {
        self.state == AppState::Started
    }

    pub fn is_staged(&self) -> bool {
        self.current_droplet.is_some()
    }

    pub fn route_urls(&self) -> Vec<String> {
        self.routes.iter().map(Route::url).collect()
    }

    pub fn has_route(&self, url: &str) -> bool {
        self.routes.iter().any(|r| r.url() == url)
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s == name)
    }
}

/// Kind of traffic a domain routes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterKind {
    #[default]
    Http,
    Tcp,
}

/// Domain available to the target org
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub guid: String,
    pub name: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub router: RouterKind,
}

impl Domain {
    pub fn http(guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            internal: false,
            router: RouterKind::Http,
        }
    }

    pub fn tcp(guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            router: RouterKind::Tcp,
            ..Self::http(guid, name)
        }
    }

    pub fn is_tcp(&self) -> bool {
        self.router == RouterKind::Tcp
    }
}

/// Parameters identifying a route within a domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteQuery {
    pub domain_guid: String,
    pub domain_name: String,
    /// Empty for routes on the bare domain and for TCP routes
    pub host: String,
    pub path: Option<String>,
    pub port: Option<u16>,
}

impl RouteQuery {
    pub fn url(&self) -> String {
        route_url(&self.host, &self.domain_name, self.port, self.path.as_deref())
    }
}

/// An existing route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub guid: String,
    pub space_guid: String,
    pub domain_guid: String,
    pub domain_name: String,
    pub host: String,
    pub path: Option<String>,
    pub port: Option<u16>,
}

impl Route {
    pub fn url(&self) -> String {
        route_url(&self.host, &self.domain_name, self.port, self.path.as_deref())
    }

    pub fn matches(&self, query: &RouteQuery) -> bool {
        self.domain_guid == query.domain_guid
            && self.host == query.host
            && self.path == query.path
            && self.port == query.port
    }
}

fn route_url(host: &str, domain: &str, port: Option<u16>, path: Option<&str>) -> String {
    let mut url = if host.is_empty() {
        domain.to_string()
    } else {
        format!("{}.{}", host, domain)
    };
    if let Some(port) = port {
        url.push_str(&format!(":{}", port));
    }
    if let Some(path) = path {
        url.push_str(path);
    }
    url
}

/// What a package contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PackageKind {
    Bits,
    Docker {
        image: String,
        username: Option<String>,
        #[serde(skip_serializing)]
        password: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageState {
    AwaitingUpload,
    Processing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub guid: String,
    pub state: PackageState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropletState {
    AwaitingUpload,
    Processing,
    Staged,
    Failed,
}

/// A droplet created to receive a prebuilt upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Droplet {
    pub guid: String,
    pub state: DropletState,
}

/// A service instance that can be bound to applications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub guid: String,
    pub name: String,
}

/// Reference to something the platform processes asynchronously
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef {
    pub kind: JobKind,
    pub guid: String,
}

impl JobRef {
    pub fn build(guid: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Build,
            guid: guid.into(),
        }
    }

    pub fn package(guid: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Package,
            guid: guid.into(),
        }
    }

    /// Processing of an uploaded droplet
    pub fn droplet(guid: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Droplet,
            guid: guid.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Build,
    Package,
    Droplet,
}

/// Result of one poll of a [`JobRef`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Processing,
    /// For builds and droplet uploads, carries the resulting droplet.
    Succeeded { droplet: Option<String> },
    Failed { reason: String },
}

/// Deployment strategy understood by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    Rolling,
    Canary,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentKind::Rolling => write!(f, "rolling"),
            DeploymentKind::Canary => write!(f, "canary"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentState {
    Deploying,
    /// Canary instance is up and waiting for promotion
    Paused,
    Deployed,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub guid: String,
    pub kind: DeploymentKind,
    pub state: DeploymentState,
    /// Instances already running the new droplet
    pub updated: u32,
    pub total: u32,
    pub reason: Option<String>,
}

impl DeploymentStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            DeploymentState::Deployed | DeploymentState::Canceled | DeploymentState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Starting,
    Running,
    Crashed,
    Down,
}

/// Stats of a single process instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStats {
    pub index: u32,
    pub state: InstanceState,
    pub uptime_secs: u64,
}

/// Scale request for a process type; `None` leaves the value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<u32>,
    #[serde(rename = "memory_in_mb", skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(rename = "disk_in_mb", skip_serializing_if = "Option::is_none")]
    pub disk_mb: Option<u64>,
}

impl ScaleRequest {
    pub fn is_empty(&self) -> bool {
        self.instances.is_none() && self.memory_mb.is_none() && self.disk_mb.is_none()
    }
}

/// Called with `(bytes_sent, total)` while bits are uploaded.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_url() {
        let route = Route {
            guid: "r1".into(),
            space_guid: "s1".into(),
            domain_guid: "d1".into(),
            domain_name: "example.com".into(),
            host: "web".into(),
            path: Some("/api".into()),
            port: None,
        };
        assert_eq!(route.url(), "web.example.com/api");

        let tcp = RouteQuery {
            domain_guid: "d2".into(),
            domain_name: "tcp.example.com".into(),
            port: Some(1024),
            ..Default::default()
        };
        assert_eq!(tcp.url(), "tcp.example.com:1024");
    }

    #[test]
    fn test_remote_app_routes() {
        let app = RemoteApp {
            routes: vec![Route {
                guid: "r1".into(),
                space_guid: "s1".into(),
                domain_guid: "d1".into(),
                domain_name: "example.com".into(),
                host: "web".into(),
                path: None,
                port: None,
            }],
            services: vec!["db".into()],
            ..Default::default()
        };
        assert_eq!(app.route_urls(), vec!["web.example.com"]);
        assert!(app.has_route("web.example.com"));
        assert!(!app.has_route("api.example.com"));
        assert!(app.has_service("db"));
        assert!(!app.has_service("cache"));
    }

    #[test]
    fn test_deployment_finished() {
        let mut status = DeploymentStatus {
            guid: "d".into(),
            kind: DeploymentKind::Rolling,
            state: DeploymentState::Deploying,
            updated: 0,
            total: 2,
            reason: None,
        };
        assert!(!status.is_finished());
        status.state = DeploymentState::Paused;
        assert!(!status.is_finished());
        status.state = DeploymentState::Deployed;
        assert!(status.is_finished());
    }
}
