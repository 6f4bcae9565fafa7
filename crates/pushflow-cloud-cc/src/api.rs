//! Cloud Controller v3 wire types
//!
//! Only the fields pushflow reads are modelled; everything else in the
//! responses is ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Paginated list response
#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub resources: Vec<T>,
}

/// Error body: `{"errors": [{"code": 10016, "title": "...", "detail": "..."}]}`
#[derive(Debug, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

/// Error code the Cloud Controller uses for name/route clashes
pub const UNIQUENESS_ERROR: u32 = 10016;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub data: Option<GuidRef>,
}

impl Relationship {
    pub fn to(guid: &str) -> Self {
        Self {
            data: Some(GuidRef {
                guid: guid.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidRef {
    pub guid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiLifecycle {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: LifecycleData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildpacks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiApp {
    pub guid: String,
    pub name: String,
    pub state: String,
    pub lifecycle: ApiLifecycle,
}

#[derive(Debug, Serialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub relationships: HashMap<&'static str, Relationship>,
    pub lifecycle: ApiLifecycle,
}

#[derive(Debug, Serialize)]
pub struct UpdateAppRequest {
    pub lifecycle: ApiLifecycle,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnvironmentVariables {
    #[serde(default)]
    pub var: HashMap<String, Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct UpdateEnvironmentRequest<'a> {
    pub var: &'a HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: HealthCheckData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ApiProcess {
    pub guid: String,
    pub instances: u32,
    pub memory_in_mb: Option<u64>,
    pub disk_in_mb: Option<u64>,
    pub command: Option<String>,
    pub health_check: Option<HealthCheck>,
}

#[derive(Debug, Default, Serialize)]
pub struct UpdateProcessRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

impl UpdateProcessRequest {
    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.health_check.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiProcessStats {
    pub index: u32,
    pub state: String,
    #[serde(default)]
    pub uptime: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApiDroplet {
    pub guid: String,
    #[serde(default)]
    pub state: String,
    pub checksum: Option<Checksum>,
    pub image: Option<String>,
    #[serde(default)]
    pub links: DropletLinks,
}

impl ApiDroplet {
    /// Guid of the package this droplet was staged from, if it has one.
    pub fn package_guid(&self) -> Option<&str> {
        let href = self.links.package.as_ref()?.href.as_str();
        href.rsplit('/').next().filter(|guid| !guid.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DropletLinks {
    pub package: Option<Link>,
}

#[derive(Debug, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Serialize)]
pub struct CreateDropletRequest {
    pub relationships: HashMap<&'static str, Relationship>,
}

#[derive(Debug, Deserialize)]
pub struct ApiPackage {
    pub guid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub state: String,
    #[serde(default)]
    pub data: PackageData,
}

#[derive(Debug, Default, Deserialize)]
pub struct PackageData {
    pub checksum: Option<Checksum>,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatePackageRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DockerData>,
    pub relationships: HashMap<&'static str, Relationship>,
}

#[derive(Debug, Serialize)]
pub struct DockerData {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateBuildRequest {
    pub package: GuidRef,
}

#[derive(Debug, Deserialize)]
pub struct ApiBuild {
    pub guid: String,
    pub state: String,
    pub error: Option<String>,
    pub droplet: Option<GuidRef>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDomain {
    pub guid: String,
    pub name: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub supported_protocols: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiRoute {
    pub guid: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    pub port: Option<u16>,
    pub url: String,
    pub relationships: RouteRelationships,
}

#[derive(Debug, Deserialize)]
pub struct RouteRelationships {
    pub space: Relationship,
    pub domain: Relationship,
}

#[derive(Debug, Serialize)]
pub struct CreateRouteRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub relationships: HashMap<&'static str, Relationship>,
}

#[derive(Debug, Serialize)]
pub struct InsertDestinationsRequest {
    pub destinations: Vec<Destination>,
}

#[derive(Debug, Serialize)]
pub struct Destination {
    pub app: GuidRef,
}

#[derive(Debug, Deserialize)]
pub struct DestinationsResponse {
    #[serde(default)]
    pub destinations: Vec<ApiDestination>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDestination {
    pub guid: String,
    pub app: GuidRef,
}

#[derive(Debug, Deserialize)]
pub struct ApiServiceInstance {
    pub guid: String,
    pub name: String,
}

/// Credential bindings listed with `include=service_instance`
#[derive(Debug, Deserialize)]
pub struct BindingsResponse {
    #[serde(default)]
    pub included: IncludedInstances,
}

#[derive(Debug, Default, Deserialize)]
pub struct IncludedInstances {
    #[serde(default)]
    pub service_instances: Vec<ApiServiceInstance>,
}

#[derive(Debug, Serialize)]
pub struct CreateBindingRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub relationships: HashMap<&'static str, Relationship>,
}

#[derive(Debug, Serialize)]
pub struct CreateDeploymentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub droplet: Option<GuidRef>,
    pub strategy: String,
    pub relationships: HashMap<&'static str, Relationship>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDeployment {
    pub guid: String,
    pub strategy: String,
    pub status: DeploymentStatusBody,
    #[serde(default)]
    pub new_processes: Vec<GuidRef>,
}

#[derive(Debug, Deserialize)]
pub struct DeploymentStatusBody {
    pub value: String,
    #[serde(default)]
    pub reason: String,
}
