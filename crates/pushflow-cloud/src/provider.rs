//! Control plane trait definition

use crate::error::Result;
use crate::resource::{
    DeploymentKind, DeploymentStatus, Domain, Droplet, InstanceStats, JobRef, JobStatus, Package,
    PackageKind, ProgressCallback, RemoteApp, Route, RouteQuery, ScaleRequest, ServiceInstance,
};
use async_trait::async_trait;
use bytes::Bytes;
use pushflow_core::{Application, Warnings};

/// Every call returns the warnings the platform attached to the response
/// next to the value.
pub type Reply<T> = Result<(T, Warnings)>;

/// Control plane abstraction trait
///
/// The HTTP client and the in-memory backend both implement this trait so
/// the planner and the actualizer never know which one they talk to.
///
/// Read operations (`lookup_app`, `list_domains`, `find_route`,
/// `find_service_instance`, `get_deployment`, `process_instances`,
/// `poll_job`) never change remote state. The planner is restricted to
/// them.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the backend name (e.g., "cloud-controller", "in-memory")
    fn name(&self) -> &str;

    /// Find an application by name within a space
    async fn lookup_app(&self, space_guid: &str, name: &str) -> Reply<Option<RemoteApp>>;

    /// Create an empty, stopped application with the lifecycle of `app`
    async fn create_app(&self, space_guid: &str, app: &Application) -> Reply<RemoteApp>;

    /// Apply the settings of `app` (env, health check, command, lifecycle)
    /// to an existing application. Scale and routes are handled by
    /// `scale_process` and `map_route`.
    async fn apply_manifest(&self, app_guid: &str, app: &Application) -> Reply<()>;

    async fn create_package(&self, app_guid: &str, kind: &PackageKind) -> Reply<Package>;

    /// Upload an archive into a bits package, reporting progress through
    /// `progress`.
    async fn upload_bits(
        &self,
        package_guid: &str,
        bits: Bytes,
        progress: ProgressCallback,
    ) -> Reply<Package>;

    /// Start staging a package; the returned job is polled with `poll_job`.
    async fn create_build(&self, package_guid: &str) -> Reply<JobRef>;

    async fn poll_job(&self, job: &JobRef) -> Reply<JobStatus>;

    async fn set_current_droplet(&self, app_guid: &str, droplet_guid: &str) -> Reply<()>;

    /// Create an empty droplet to upload a prebuilt one into
    async fn create_droplet(&self, app_guid: &str) -> Reply<Droplet>;

    /// Upload a prebuilt droplet; the returned job is polled with
    /// `poll_job` until the droplet is staged.
    async fn upload_droplet(
        &self,
        droplet_guid: &str,
        bits: Bytes,
        progress: ProgressCallback,
    ) -> Reply<JobRef>;

    /// Domains usable by the org, the default (shared) domain first
    async fn list_domains(&self, org_guid: &str) -> Reply<Vec<Domain>>;

    async fn find_route(&self, query: &RouteQuery) -> Reply<Option<Route>>;

    async fn create_route(&self, space_guid: &str, query: &RouteQuery) -> Reply<Route>;

    /// Map a route to the app's web process. Mapping twice is a no-op.
    async fn map_route(&self, app_guid: &str, route_guid: &str) -> Reply<()>;

    /// Remove the app from a route's destinations. The route itself stays.
    async fn unmap_route(&self, app_guid: &str, route_guid: &str) -> Reply<()>;

    async fn find_service_instance(
        &self,
        space_guid: &str,
        name: &str,
    ) -> Reply<Option<ServiceInstance>>;

    async fn bind_service(&self, app_guid: &str, instance_guid: &str) -> Reply<()>;

    async fn scale_process(
        &self,
        app_guid: &str,
        process_type: &str,
        scale: &ScaleRequest,
    ) -> Reply<()>;

    async fn start_app(&self, app_guid: &str) -> Reply<()>;

    async fn restart_app(&self, app_guid: &str) -> Reply<()>;

    async fn create_deployment(
        &self,
        app_guid: &str,
        droplet_guid: Option<&str>,
        kind: DeploymentKind,
    ) -> Reply<DeploymentStatus>;

    async fn get_deployment(&self, deployment_guid: &str) -> Reply<DeploymentStatus>;

    async fn cancel_deployment(&self, deployment_guid: &str) -> Reply<()>;

    /// Stats for every instance of the app's web process
    async fn process_instances(&self, app_guid: &str) -> Reply<Vec<InstanceStats>>;
}
