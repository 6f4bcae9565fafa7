//! In-memory control plane
//!
//! Keeps every resource in a mutex-guarded map and answers the
//! [`ControlPlane`] calls the way a real platform would, including the
//! asynchronous parts (staging, instance startup, deployments) which
//! advance one step per poll. Used as the test double for the planner and
//! the actualizer and as the `--dry-run` backend of the CLI.
//!
//! Every call is recorded so tests can assert on what was (and was not)
//! called.

use crate::error::{CloudError, Result};
use crate::provider::{ControlPlane, Reply};
use crate::resource::{
    AppState, DeploymentKind, DeploymentState, DeploymentStatus, Domain, Droplet, DropletState,
    InstanceState, InstanceStats, JobKind, JobRef, JobStatus, Lifecycle, Package, PackageKind,
    PackageState, ProgressCallback, RemoteApp, Route, RouteQuery, ScaleRequest, ServiceInstance,
};
use async_trait::async_trait;
use bytes::Bytes;
use pushflow_core::{Application, Warnings};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Methods that change remote state
const MUTATING_CALLS: [&str; 17] = [
    "create_app",
    "apply_manifest",
    "create_package",
    "upload_bits",
    "create_build",
    "set_current_droplet",
    "create_droplet",
    "upload_droplet",
    "create_route",
    "map_route",
    "unmap_route",
    "bind_service",
    "scale_process",
    "start_app",
    "restart_app",
    "create_deployment",
    "cancel_deployment",
];

/// How a build ends once its processing polls are used up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BuildOutcome {
    #[default]
    Succeed,
    Fail(String),
    /// Stays in processing forever
    NeverFinish,
}

/// Knobs for the simulated platform
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Polls that report `Processing` before a build finishes
    pub build_polls: u32,
    pub build_outcome: BuildOutcome,
    /// Uploads (bits or droplet) that fail with a retryable error before
    /// one succeeds
    pub upload_failures: u32,
    /// Polls of `process_instances` that report `Starting`
    pub startup_polls: u32,
    /// Instance 0 crashes as soon as it is started
    pub crash_on_start: bool,
    /// Instance 0 keeps restarting: its uptime drops on every poll
    pub flapping: bool,
    /// Returned by every `apply_manifest` call
    pub apply_manifest_error: Option<CloudError>,
    /// Returned by every `unmap_route` call
    pub unmap_route_error: Option<CloudError>,
    /// Returned by every `bind_service` call
    pub bind_service_error: Option<CloudError>,
    /// Polls of `get_deployment` per replaced instance
    pub deployment_polls_per_instance: u32,
    /// Attached to every `lookup_app` reply
    pub lookup_warnings: Vec<String>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            build_polls: 2,
            build_outcome: BuildOutcome::Succeed,
            upload_failures: 0,
            startup_polls: 1,
            crash_on_start: false,
            flapping: false,
            apply_manifest_error: None,
            unmap_route_error: None,
            bind_service_error: None,
            deployment_polls_per_instance: 1,
            lookup_warnings: Vec::new(),
        }
    }
}

/// A call made against the in-memory control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: &'static str,
    /// Main argument of the call (name, guid or url)
    pub target: String,
}

#[derive(Debug)]
struct AppRecord {
    space_guid: String,
    app: RemoteApp,
    instance_polls: u32,
}

#[derive(Debug)]
struct PackageRecord {
    state: PackageState,
    /// Set once bits are uploaded
    checksum: Option<String>,
    image: Option<String>,
}

#[derive(Debug)]
struct DropletRecord {
    state: DropletState,
    /// Package a build staged the droplet from; `None` for uploads
    package_guid: Option<String>,
    /// Set for uploaded droplets
    checksum: Option<String>,
}

#[derive(Debug)]
struct BuildRecord {
    package_guid: String,
    polls: u32,
}

#[derive(Debug)]
struct DeploymentRecord {
    app_guid: String,
    status: DeploymentStatus,
    polls: u32,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    apps: BTreeMap<String, AppRecord>,
    domains: Vec<Domain>,
    routes: Vec<Route>,
    /// route guid -> app guids
    mappings: BTreeMap<String, Vec<String>>,
    packages: BTreeMap<String, PackageRecord>,
    builds: BTreeMap<String, BuildRecord>,
    droplets: BTreeMap<String, DropletRecord>,
    /// (space guid, instance)
    services: Vec<(String, ServiceInstance)>,
    deployments: BTreeMap<String, DeploymentRecord>,
    upload_failures_left: u32,
    calls: Vec<RecordedCall>,
}

impl State {
    fn take_upload_failure(&mut self) -> bool {
        if self.upload_failures_left > 0 {
            self.upload_failures_left -= 1;
            true
        } else {
            false
        }
    }

    fn next_guid(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn record(&mut self, method: &'static str, target: impl Into<String>) {
        self.calls.push(RecordedCall {
            method,
            target: target.into(),
        });
    }

    fn app_mut(&mut self, guid: &str) -> Result<&mut AppRecord> {
        self.apps
            .get_mut(guid)
            .ok_or_else(|| CloudError::NotFound(format!("app {}", guid)))
    }

    /// Make `droplet_guid` the app's current droplet, carrying over what it
    /// was staged from. Droplets this backend never produced carry nothing.
    fn make_current(&mut self, app_guid: &str, droplet_guid: &str) -> Result<()> {
        let droplet = self.droplets.get(droplet_guid);
        let package = droplet
            .and_then(|d| d.package_guid.as_ref())
            .and_then(|guid| self.packages.get(guid));
        let staged_checksum = package.and_then(|p| p.checksum.clone());
        let staged_image = package.and_then(|p| p.image.clone());
        let droplet_checksum = droplet.and_then(|d| d.checksum.clone());

        let remote = &mut self.app_mut(app_guid)?.app;
        remote.current_droplet = Some(droplet_guid.to_string());
        remote.staged_checksum = staged_checksum;
        remote.staged_image = staged_image;
        remote.droplet_checksum = droplet_checksum;
        debug!("App {} now runs droplet {}", app_guid, droplet_guid);
        Ok(())
    }
}

/// In-memory [`ControlPlane`]
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
    behavior: Behavior,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.lock_state_mut().upload_failures_left = behavior.upload_failures;
        self.behavior = behavior;
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.lock_state_mut().domains.push(domain);
        self
    }

    /// Seed an existing application in `space_guid`.
    pub fn with_app(mut self, space_guid: impl Into<String>, app: RemoteApp) -> Self {
        let record = AppRecord {
            space_guid: space_guid.into(),
            app,
            instance_polls: 0,
        };
        self.lock_state_mut()
            .apps
            .insert(record.app.guid.clone(), record);
        self
    }

    /// Seed an existing route, optionally mapped to an app.
    pub fn with_route(mut self, route: Route, mapped_to: Option<&str>) -> Self {
        let state = self.lock_state_mut();
        if let Some(app_guid) = mapped_to {
            state
                .mappings
                .entry(route.guid.clone())
                .or_default()
                .push(app_guid.to_string());
            if let Some(record) = state.apps.get_mut(app_guid) {
                record.app.routes.push(route.clone());
            }
        }
        state.routes.push(route);
        self
    }

    /// Seed a service instance in `space_guid`.
    pub fn with_service_instance(
        mut self,
        space_guid: impl Into<String>,
        instance: ServiceInstance,
    ) -> Self {
        self.lock_state_mut()
            .services
            .push((space_guid.into(), instance));
        self
    }

    fn lock_state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Calls that changed remote state
    pub fn mutating_calls(&self) -> Vec<RecordedCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| MUTATING_CALLS.contains(&c.method))
            .cloned()
            .collect()
    }

    pub fn app_count(&self) -> usize {
        self.state().apps.len()
    }

    pub fn route_count(&self) -> usize {
        self.state().routes.len()
    }

    /// Current view of an app, looked up by name
    pub fn app_named(&self, name: &str) -> Option<RemoteApp> {
        self.state()
            .apps
            .values()
            .find(|r| r.app.name == name)
            .map(|r| r.app.clone())
    }

    fn ok<T>(value: T) -> Reply<T> {
        Ok((value, Warnings::new()))
    }
}

/// Report an upload in four steps, yielding between them.
async fn stream_progress(total: u64, progress: &ProgressCallback) {
    let chunk = (total / 4).max(1);
    let mut sent = 0;
    while sent < total {
        sent = (sent + chunk).min(total);
        progress(sent, total);
        tokio::task::yield_now().await;
    }
}

fn lifecycle_of(app: &Application) -> Lifecycle {
    match &app.docker {
        Some(docker) => Lifecycle::Docker {
            image: docker.image.clone(),
        },
        None => Lifecycle::Buildpack {
            buildpacks: app.requested_buildpacks().unwrap_or_default(),
            stack: app.stack.clone(),
        },
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn lookup_app(&self, space_guid: &str, name: &str) -> Reply<Option<RemoteApp>> {
        let mut state = self.state();
        state.record("lookup_app", name);
        let found = state
            .apps
            .values()
            .find(|r| r.space_guid == space_guid && r.app.name == name)
            .map(|r| r.app.clone());
        let warnings = self.behavior.lookup_warnings.iter().cloned().collect();
        Ok((found, warnings))
    }

    async fn create_app(&self, space_guid: &str, app: &Application) -> Reply<RemoteApp> {
        let mut state = self.state();
        state.record("create_app", &app.name);
        if state
            .apps
            .values()
            .any(|r| r.space_guid == space_guid && r.app.name == app.name)
        {
            return Err(CloudError::AlreadyExists(format!("app {}", app.name)));
        }

        let guid = state.next_guid("app");
        let remote = RemoteApp {
            guid: guid.clone(),
            name: app.name.clone(),
            state: AppState::Stopped,
            lifecycle: lifecycle_of(app),
            instances: 1,
            ..Default::default()
        };
        state.apps.insert(
            guid,
            AppRecord {
                space_guid: space_guid.to_string(),
                app: remote.clone(),
                instance_polls: 0,
            },
        );
        info!("Created app {} ({}) in {}", remote.name, remote.guid, space_guid);
        Self::ok(remote)
    }

    async fn apply_manifest(&self, app_guid: &str, app: &Application) -> Reply<()> {
        let mut state = self.state();
        state.record("apply_manifest", app_guid);
        if let Some(err) = &self.behavior.apply_manifest_error {
            return Err(err.clone());
        }

        let record = state.app_mut(app_guid)?;
        let remote = &mut record.app;
        remote.lifecycle = lifecycle_of(app);
        remote.env.extend(app.env.clone());
        if app.health_check_type.is_some() {
            remote.health_check_type = app.health_check_type;
            remote.health_check_endpoint = app.health_check_http_endpoint.clone();
        }
        if app.timeout.is_some() {
            remote.health_check_timeout = app.timeout;
        }
        if app.command.is_some() {
            remote.command = app.command.clone();
        }
        Self::ok(())
    }

    async fn create_package(&self, app_guid: &str, kind: &PackageKind) -> Reply<Package> {
        let mut state = self.state();
        state.record("create_package", app_guid);
        state.app_mut(app_guid)?;

        let guid = state.next_guid("pkg");
        let (package_state, image) = match kind {
            PackageKind::Bits => (PackageState::AwaitingUpload, None),
            PackageKind::Docker { image, .. } => (PackageState::Ready, Some(image.clone())),
        };
        debug!("Package {} for {} is {:?}", guid, app_guid, package_state);
        state.packages.insert(
            guid.clone(),
            PackageRecord {
                state: package_state,
                checksum: None,
                image,
            },
        );
        Self::ok(Package {
            guid,
            state: package_state,
        })
    }

    async fn upload_bits(
        &self,
        package_guid: &str,
        bits: Bytes,
        progress: ProgressCallback,
    ) -> Reply<Package> {
        let total = bits.len() as u64;
        {
            let mut state = self.state();
            state.record("upload_bits", package_guid);
            if !state.packages.contains_key(package_guid) {
                return Err(CloudError::NotFound(format!("package {}", package_guid)));
            }
            if state.take_upload_failure() {
                drop(state);
                progress(total / 2, total);
                return Err(CloudError::UploadInterrupted(
                    "connection reset while streaming package".to_string(),
                ));
            }
        }

        stream_progress(total, &progress).await;

        let checksum = format!("{:x}", Sha256::digest(&bits));
        let mut state = self.state();
        let package = state
            .packages
            .get_mut(package_guid)
            .ok_or_else(|| CloudError::NotFound(format!("package {}", package_guid)))?;
        package.state = PackageState::Ready;
        debug!("Package {} ready, sha256 {}", package_guid, checksum);
        package.checksum = Some(checksum);
        Self::ok(Package {
            guid: package_guid.to_string(),
            state: PackageState::Ready,
        })
    }

    async fn create_build(&self, package_guid: &str) -> Reply<JobRef> {
        let mut state = self.state();
        state.record("create_build", package_guid);
        match state.packages.get(package_guid) {
            Some(p) if p.state == PackageState::Ready => {}
            Some(_) => {
                return Err(CloudError::UnprocessableEntity(format!(
                    "package {} is not ready",
                    package_guid
                )));
            }
            None => return Err(CloudError::NotFound(format!("package {}", package_guid))),
        }
        let guid = state.next_guid("build");
        debug!("Build {} started for package {}", guid, package_guid);
        state.builds.insert(
            guid.clone(),
            BuildRecord {
                package_guid: package_guid.to_string(),
                polls: 0,
            },
        );
        Self::ok(JobRef::build(guid))
    }

    async fn poll_job(&self, job: &JobRef) -> Reply<JobStatus> {
        let mut state = self.state();
        state.record("poll_job", &job.guid);

        match job.kind {
            JobKind::Package => {
                let package = state
                    .packages
                    .get(&job.guid)
                    .ok_or_else(|| CloudError::NotFound(format!("package {}", job.guid)))?;
                let status = match package.state {
                    PackageState::Ready => JobStatus::Succeeded { droplet: None },
                    PackageState::Failed => JobStatus::Failed {
                        reason: "package processing failed".to_string(),
                    },
                    _ => JobStatus::Processing,
                };
                Self::ok(status)
            }
            JobKind::Build => {
                let build = state
                    .builds
                    .get_mut(&job.guid)
                    .ok_or_else(|| CloudError::NotFound(format!("build {}", job.guid)))?;
                build.polls += 1;
                if build.polls <= self.behavior.build_polls {
                    return Self::ok(JobStatus::Processing);
                }
                let package_guid = build.package_guid.clone();
                match &self.behavior.build_outcome {
                    BuildOutcome::NeverFinish => Self::ok(JobStatus::Processing),
                    BuildOutcome::Fail(reason) => {
                        debug!("Build {} failed: {}", job.guid, reason);
                        Self::ok(JobStatus::Failed {
                            reason: reason.clone(),
                        })
                    }
                    BuildOutcome::Succeed => {
                        let droplet = format!("droplet-{}", package_guid);
                        if !state.droplets.contains_key(&droplet) {
                            debug!("Build {} staged droplet {}", job.guid, droplet);
                        }
                        state.droplets.insert(
                            droplet.clone(),
                            DropletRecord {
                                state: DropletState::Staged,
                                package_guid: Some(package_guid),
                                checksum: None,
                            },
                        );
                        Self::ok(JobStatus::Succeeded {
                            droplet: Some(droplet),
                        })
                    }
                }
            }
            JobKind::Droplet => {
                let droplet = state
                    .droplets
                    .get(&job.guid)
                    .ok_or_else(|| CloudError::NotFound(format!("droplet {}", job.guid)))?;
                let status = match droplet.state {
                    DropletState::Staged => JobStatus::Succeeded {
                        droplet: Some(job.guid.clone()),
                    },
                    DropletState::Failed => JobStatus::Failed {
                        reason: "droplet processing failed".to_string(),
                    },
                    _ => JobStatus::Processing,
                };
                Self::ok(status)
            }
        }
    }

    async fn set_current_droplet(&self, app_guid: &str, droplet_guid: &str) -> Reply<()> {
        let mut state = self.state();
        state.record("set_current_droplet", droplet_guid);
        state.make_current(app_guid, droplet_guid)?;
        Self::ok(())
    }

    async fn create_droplet(&self, app_guid: &str) -> Reply<Droplet> {
        let mut state = self.state();
        state.record("create_droplet", app_guid);
        state.app_mut(app_guid)?;
        let guid = state.next_guid("droplet");
        state.droplets.insert(
            guid.clone(),
            DropletRecord {
                state: DropletState::AwaitingUpload,
                package_guid: None,
                checksum: None,
            },
        );
        Self::ok(Droplet {
            guid,
            state: DropletState::AwaitingUpload,
        })
    }

    async fn upload_droplet(
        &self,
        droplet_guid: &str,
        bits: Bytes,
        progress: ProgressCallback,
    ) -> Reply<JobRef> {
        let total = bits.len() as u64;
        {
            let mut state = self.state();
            state.record("upload_droplet", droplet_guid);
            if !state.droplets.contains_key(droplet_guid) {
                return Err(CloudError::NotFound(format!("droplet {}", droplet_guid)));
            }
            if state.take_upload_failure() {
                drop(state);
                progress(total / 2, total);
                return Err(CloudError::UploadInterrupted(
                    "connection reset while streaming droplet".to_string(),
                ));
            }
        }

        stream_progress(total, &progress).await;

        let checksum = format!("{:x}", Sha256::digest(&bits));
        let mut state = self.state();
        let droplet = state
            .droplets
            .get_mut(droplet_guid)
            .ok_or_else(|| CloudError::NotFound(format!("droplet {}", droplet_guid)))?;
        droplet.state = DropletState::Staged;
        debug!("Droplet {} uploaded, sha256 {}", droplet_guid, checksum);
        droplet.checksum = Some(checksum);
        Self::ok(JobRef::droplet(droplet_guid))
    }

    async fn list_domains(&self, org_guid: &str) -> Reply<Vec<Domain>> {
        let mut state = self.state();
        state.record("list_domains", org_guid);
        Self::ok(state.domains.clone())
    }

    async fn find_route(&self, query: &RouteQuery) -> Reply<Option<Route>> {
        let mut state = self.state();
        state.record("find_route", query.url());
        let found = state.routes.iter().find(|r| r.matches(query)).cloned();
        Self::ok(found)
    }

    async fn create_route(&self, space_guid: &str, query: &RouteQuery) -> Reply<Route> {
        let mut state = self.state();
        state.record("create_route", query.url());
        if state.routes.iter().any(|r| r.matches(query)) {
            return Err(CloudError::AlreadyExists(format!("route {}", query.url())));
        }
        let route = Route {
            guid: state.next_guid("route"),
            space_guid: space_guid.to_string(),
            domain_guid: query.domain_guid.clone(),
            domain_name: query.domain_name.clone(),
            host: query.host.clone(),
            path: query.path.clone(),
            port: query.port,
        };
        state.routes.push(route.clone());
        Self::ok(route)
    }

    async fn map_route(&self, app_guid: &str, route_guid: &str) -> Reply<()> {
        let mut state = self.state();
        state.record("map_route", route_guid);
        let route = state
            .routes
            .iter()
            .find(|r| r.guid == route_guid)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("route {}", route_guid)))?;

        let apps = state.mappings.entry(route_guid.to_string()).or_default();
        if apps.iter().any(|a| a == app_guid) {
            return Self::ok(());
        }
        apps.push(app_guid.to_string());
        debug!("Mapped {} to {}", route.url(), app_guid);
        state.app_mut(app_guid)?.app.routes.push(route);
        Self::ok(())
    }

    async fn unmap_route(&self, app_guid: &str, route_guid: &str) -> Reply<()> {
        let mut state = self.state();
        state.record("unmap_route", route_guid);
        if let Some(err) = &self.behavior.unmap_route_error {
            return Err(err.clone());
        }
        if !state.routes.iter().any(|r| r.guid == route_guid) {
            return Err(CloudError::NotFound(format!("route {}", route_guid)));
        }

        if let Some(apps) = state.mappings.get_mut(route_guid) {
            apps.retain(|a| a != app_guid);
        }
        state
            .app_mut(app_guid)?
            .app
            .routes
            .retain(|r| r.guid != route_guid);
        debug!("Unmapped route {} from {}", route_guid, app_guid);
        Self::ok(())
    }

    async fn find_service_instance(
        &self,
        space_guid: &str,
        name: &str,
    ) -> Reply<Option<ServiceInstance>> {
        let mut state = self.state();
        state.record("find_service_instance", name);
        let found = state
            .services
            .iter()
            .find(|(space, instance)| space == space_guid && instance.name == name)
            .map(|(_, instance)| instance.clone());
        Self::ok(found)
    }

    async fn bind_service(&self, app_guid: &str, instance_guid: &str) -> Reply<()> {
        let mut state = self.state();
        state.record("bind_service", instance_guid);
        if let Some(err) = &self.behavior.bind_service_error {
            return Err(err.clone());
        }
        let name = state
            .services
            .iter()
            .find(|(_, instance)| instance.guid == instance_guid)
            .map(|(_, instance)| instance.name.clone())
            .ok_or_else(|| CloudError::NotFound(format!("service instance {}", instance_guid)))?;

        let remote = &mut state.app_mut(app_guid)?.app;
        if remote.has_service(&name) {
            return Err(CloudError::AlreadyExists(format!(
                "binding of {} to {}",
                name, app_guid
            )));
        }
        debug!("Bound {} to {}", name, app_guid);
        remote.services.push(name);
        Self::ok(())
    }

    async fn scale_process(
        &self,
        app_guid: &str,
        process_type: &str,
        scale: &ScaleRequest,
    ) -> Reply<()> {
        let mut state = self.state();
        state.record("scale_process", format!("{}/{}", app_guid, process_type));
        let remote = &mut state.app_mut(app_guid)?.app;
        if let Some(instances) = scale.instances {
            remote.instances = instances;
        }
        if scale.memory_mb.is_some() {
            remote.memory_mb = scale.memory_mb;
        }
        if scale.disk_mb.is_some() {
            remote.disk_mb = scale.disk_mb;
        }
        Self::ok(())
    }

    async fn start_app(&self, app_guid: &str) -> Reply<()> {
        let mut state = self.state();
        state.record("start_app", app_guid);
        let record = state.app_mut(app_guid)?;
        if record.app.current_droplet.is_none() {
            return Err(CloudError::UnprocessableEntity(
                "app has no droplet to start".to_string(),
            ));
        }
        record.app.state = AppState::Started;
        record.instance_polls = 0;
        info!("Started app {}", app_guid);
        Self::ok(())
    }

    async fn restart_app(&self, app_guid: &str) -> Reply<()> {
        let mut state = self.state();
        state.record("restart_app", app_guid);
        let record = state.app_mut(app_guid)?;
        record.app.state = AppState::Started;
        record.instance_polls = 0;
        info!("Restarted app {}", app_guid);
        Self::ok(())
    }

    async fn create_deployment(
        &self,
        app_guid: &str,
        droplet_guid: Option<&str>,
        kind: DeploymentKind,
    ) -> Reply<DeploymentStatus> {
        let mut state = self.state();
        state.record("create_deployment", app_guid);
        let guid = state.next_guid("deployment");
        if let Some(droplet) = droplet_guid {
            state.make_current(app_guid, droplet)?;
        }
        let record = state.app_mut(app_guid)?;
        record.app.active_deployment = Some(guid.clone());
        record.app.state = AppState::Started;
        record.instance_polls = 0;

        let status = DeploymentStatus {
            guid: guid.clone(),
            kind,
            state: DeploymentState::Deploying,
            updated: 0,
            total: record.app.instances.max(1),
            reason: None,
        };
        info!("Deployment {} ({}) of {} started", guid, kind, app_guid);
        state.deployments.insert(
            guid,
            DeploymentRecord {
                app_guid: app_guid.to_string(),
                status: status.clone(),
                polls: 0,
            },
        );
        Self::ok(status)
    }

    async fn get_deployment(&self, deployment_guid: &str) -> Reply<DeploymentStatus> {
        let mut state = self.state();
        state.record("get_deployment", deployment_guid);
        let per_instance = self.behavior.deployment_polls_per_instance.max(1);
        let crash = self.behavior.crash_on_start;

        let record = state
            .deployments
            .get_mut(deployment_guid)
            .ok_or_else(|| CloudError::NotFound(format!("deployment {}", deployment_guid)))?;

        if !record.status.is_finished() && record.status.state != DeploymentState::Paused {
            let before = record.status.state;
            record.polls += 1;
            let updated = (record.polls / per_instance).min(record.status.total);
            // a crashing app never gets past the first instance
            record.status.updated = if crash { 0 } else { updated };
            match record.status.kind {
                DeploymentKind::Canary if record.status.updated >= 1 => {
                    record.status.state = DeploymentState::Paused;
                }
                DeploymentKind::Rolling if record.status.updated == record.status.total => {
                    record.status.state = DeploymentState::Deployed;
                }
                _ => {}
            }
            if record.status.state != before {
                debug!(
                    "Deployment {}: {:?} -> {:?}",
                    deployment_guid, before, record.status.state
                );
            }
        }

        let status = record.status.clone();
        if status.is_finished() {
            let app_guid = record.app_guid.clone();
            state.app_mut(&app_guid)?.app.active_deployment = None;
        }
        Self::ok(status)
    }

    async fn cancel_deployment(&self, deployment_guid: &str) -> Reply<()> {
        let mut state = self.state();
        state.record("cancel_deployment", deployment_guid);
        let record = state
            .deployments
            .get_mut(deployment_guid)
            .ok_or_else(|| CloudError::NotFound(format!("deployment {}", deployment_guid)))?;
        record.status.state = DeploymentState::Canceled;
        info!("Deployment {} canceled", deployment_guid);
        let app_guid = record.app_guid.clone();
        state.app_mut(&app_guid)?.app.active_deployment = None;
        Self::ok(())
    }

    async fn process_instances(&self, app_guid: &str) -> Reply<Vec<InstanceStats>> {
        let mut state = self.state();
        state.record("process_instances", app_guid);
        let startup_polls = self.behavior.startup_polls;
        let crash = self.behavior.crash_on_start;
        let flapping = self.behavior.flapping;

        let record = state.app_mut(app_guid)?;
        if record.app.state == AppState::Stopped {
            return Self::ok(Vec::new());
        }
        record.instance_polls += 1;
        let polls = record.instance_polls;

        let stats = (0..record.app.instances.max(1))
            .map(|index| {
                let (instance_state, uptime_secs) = if index == 0 && crash {
                    (InstanceState::Crashed, 0)
                } else if index == 0 && flapping {
                    // restarted between every two polls
                    (InstanceState::Running, 60u64.saturating_sub(u64::from(polls) * 10))
                } else if polls <= startup_polls {
                    (InstanceState::Starting, 0)
                } else {
                    (InstanceState::Running, u64::from(polls - startup_polls) * 5)
                };
                InstanceStats {
                    index,
                    state: instance_state,
                    uptime_secs,
                }
            })
            .collect();
        Self::ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn noop_progress() -> ProgressCallback {
        Arc::new(|_, _| {})
    }

    #[tokio::test]
    async fn test_create_app_twice_is_rejected() {
        let cp = InMemoryControlPlane::new();
        let app = Application::named("web");
        let (created, _) = cp.create_app("space-1", &app).await.unwrap();
        assert_eq!(created.state, AppState::Stopped);

        let err = cp.create_app("space-1", &app).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cp.app_count(), 1);

        // same name in another space is a different app
        cp.create_app("space-2", &app).await.unwrap();
        assert_eq!(cp.app_count(), 2);
    }

    #[tokio::test]
    async fn test_upload_reports_progress_and_checksum() {
        let cp = InMemoryControlPlane::new();
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();
        let (pkg, _) = cp.create_package(&app.guid, &PackageKind::Bits).await.unwrap();
        assert_eq!(pkg.state, PackageState::AwaitingUpload);

        let last = Arc::new(AtomicU64::new(0));
        let seen = last.clone();
        let progress: ProgressCallback = Arc::new(move |sent, _| seen.store(sent, Ordering::SeqCst));
        let bits = Bytes::from_static(b"hello world");
        let (ready, _) = cp.upload_bits(&pkg.guid, bits, progress).await.unwrap();

        assert_eq!(ready.state, PackageState::Ready);
        assert_eq!(last.load(Ordering::SeqCst), 11);
        // uploaded bits are not what the app runs until a droplet is made current
        let remote = cp.app_named("web").unwrap();
        assert_eq!(remote.staged_checksum, None);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_operations_are_traced() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let cp = InMemoryControlPlane::new();
        cp.create_app("space-1", &Application::named("web")).await.unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Created app web"), "{output}");
    }

    #[tokio::test]
    async fn test_staged_checksum_follows_current_droplet() {
        let cp = InMemoryControlPlane::new().with_behavior(Behavior {
            build_polls: 0,
            ..Default::default()
        });
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();
        let (pkg, _) = cp.create_package(&app.guid, &PackageKind::Bits).await.unwrap();
        cp.upload_bits(&pkg.guid, Bytes::from_static(b"hello world"), noop_progress())
            .await
            .unwrap();
        let (job, _) = cp.create_build(&pkg.guid).await.unwrap();
        let JobStatus::Succeeded {
            droplet: Some(droplet),
        } = cp.poll_job(&job).await.unwrap().0
        else {
            panic!("build did not stage");
        };
        assert_eq!(cp.app_named("web").unwrap().staged_checksum, None);

        cp.set_current_droplet(&app.guid, &droplet).await.unwrap();
        let remote = cp.app_named("web").unwrap();
        assert_eq!(remote.current_droplet.as_deref(), Some(droplet.as_str()));
        assert_eq!(
            remote.staged_checksum.as_deref(),
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
    }

    #[tokio::test]
    async fn test_failed_build_leaves_staged_checksum() {
        let cp = InMemoryControlPlane::new().with_behavior(Behavior {
            build_polls: 0,
            build_outcome: BuildOutcome::Fail("boom".into()),
            ..Default::default()
        });
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();
        let (pkg, _) = cp.create_package(&app.guid, &PackageKind::Bits).await.unwrap();
        cp.upload_bits(&pkg.guid, Bytes::from_static(b"new bits"), noop_progress())
            .await
            .unwrap();
        let (job, _) = cp.create_build(&pkg.guid).await.unwrap();
        assert!(matches!(
            cp.poll_job(&job).await.unwrap().0,
            JobStatus::Failed { .. }
        ));

        let remote = cp.app_named("web").unwrap();
        assert!(!remote.is_staged());
        assert_eq!(remote.staged_checksum, None);
    }

    #[tokio::test]
    async fn test_droplet_upload() {
        let cp = InMemoryControlPlane::new().with_behavior(Behavior {
            upload_failures: 1,
            ..Default::default()
        });
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();
        let (droplet, _) = cp.create_droplet(&app.guid).await.unwrap();
        assert_eq!(droplet.state, DropletState::AwaitingUpload);

        let bits = Bytes::from_static(b"droplet");
        let err = cp
            .upload_droplet(&droplet.guid, bits.clone(), noop_progress())
            .await
            .unwrap_err();
        assert!(err.is_retryable_upload());

        let (job, _) = cp
            .upload_droplet(&droplet.guid, bits, noop_progress())
            .await
            .unwrap();
        assert_eq!(job, JobRef::droplet(&droplet.guid));
        assert_eq!(
            cp.poll_job(&job).await.unwrap().0,
            JobStatus::Succeeded {
                droplet: Some(droplet.guid.clone())
            }
        );

        cp.set_current_droplet(&app.guid, &droplet.guid).await.unwrap();
        let remote = cp.app_named("web").unwrap();
        assert_eq!(
            remote.droplet_checksum,
            Some(format!("{:x}", Sha256::digest(b"droplet")))
        );
        assert_eq!(remote.staged_checksum, None);
    }

    #[tokio::test]
    async fn test_upload_failures_are_retryable() {
        let cp = InMemoryControlPlane::new().with_behavior(Behavior {
            upload_failures: 1,
            ..Default::default()
        });
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();
        let (pkg, _) = cp.create_package(&app.guid, &PackageKind::Bits).await.unwrap();

        let bits = Bytes::from_static(b"abc");
        let err = cp
            .upload_bits(&pkg.guid, bits.clone(), noop_progress())
            .await
            .unwrap_err();
        assert!(err.is_retryable_upload());
        assert!(cp.upload_bits(&pkg.guid, bits, noop_progress()).await.is_ok());
    }

    #[tokio::test]
    async fn test_build_processes_then_succeeds() {
        let cp = InMemoryControlPlane::new().with_behavior(Behavior {
            build_polls: 2,
            ..Default::default()
        });
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();
        let (pkg, _) = cp.create_package(&app.guid, &PackageKind::Bits).await.unwrap();
        cp.upload_bits(&pkg.guid, Bytes::from_static(b"x"), noop_progress())
            .await
            .unwrap();
        let (job, _) = cp.create_build(&pkg.guid).await.unwrap();

        assert_eq!(cp.poll_job(&job).await.unwrap().0, JobStatus::Processing);
        assert_eq!(cp.poll_job(&job).await.unwrap().0, JobStatus::Processing);
        assert!(matches!(
            cp.poll_job(&job).await.unwrap().0,
            JobStatus::Succeeded { droplet: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_map_route_is_idempotent() {
        let cp = InMemoryControlPlane::new().with_domain(Domain::http("d1", "example.com"));
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();
        let query = RouteQuery {
            domain_guid: "d1".into(),
            domain_name: "example.com".into(),
            host: "web".into(),
            ..Default::default()
        };
        let (route, _) = cp.create_route("s", &query).await.unwrap();
        assert!(cp.create_route("s", &query).await.unwrap_err().is_already_exists());

        cp.map_route(&app.guid, &route.guid).await.unwrap();
        cp.map_route(&app.guid, &route.guid).await.unwrap();
        assert_eq!(
            cp.app_named("web").unwrap().route_urls(),
            vec!["web.example.com"]
        );
        assert_eq!(
            cp.find_route(&query).await.unwrap().0.map(|r| r.guid),
            Some(route.guid)
        );
    }

    #[tokio::test]
    async fn test_unmap_route_keeps_the_route() {
        let cp = InMemoryControlPlane::new().with_domain(Domain::http("d1", "example.com"));
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();
        let query = RouteQuery {
            domain_guid: "d1".into(),
            domain_name: "example.com".into(),
            host: "web".into(),
            ..Default::default()
        };
        let (route, _) = cp.create_route("s", &query).await.unwrap();
        cp.map_route(&app.guid, &route.guid).await.unwrap();

        cp.unmap_route(&app.guid, &route.guid).await.unwrap();
        assert!(cp.app_named("web").unwrap().routes.is_empty());
        assert_eq!(cp.route_count(), 1);

        let err = cp.unmap_route(&app.guid, "route-missing").await.unwrap_err();
        assert!(matches!(err, CloudError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bind_service() {
        let db = ServiceInstance {
            guid: "si-1".into(),
            name: "db".into(),
        };
        let cp = InMemoryControlPlane::new().with_service_instance("s", db.clone());
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();

        assert_eq!(cp.find_service_instance("s", "db").await.unwrap().0, Some(db));
        assert_eq!(cp.find_service_instance("other", "db").await.unwrap().0, None);

        cp.bind_service(&app.guid, "si-1").await.unwrap();
        assert_eq!(cp.app_named("web").unwrap().services, vec!["db"]);
        assert!(cp.bind_service(&app.guid, "si-1").await.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn test_rolling_deployment_progresses() {
        let remote = RemoteApp {
            guid: "app-1".into(),
            name: "web".into(),
            state: AppState::Started,
            instances: 2,
            current_droplet: Some("old".into()),
            ..Default::default()
        };
        let cp = InMemoryControlPlane::new().with_app("s", remote);
        let (dep, _) = cp
            .create_deployment("app-1", Some("new"), DeploymentKind::Rolling)
            .await
            .unwrap();
        assert_eq!(
            cp.app_named("web").unwrap().active_deployment.as_deref(),
            Some(dep.guid.as_str())
        );

        let (first, _) = cp.get_deployment(&dep.guid).await.unwrap();
        assert_eq!((first.state, first.updated), (DeploymentState::Deploying, 1));
        let (second, _) = cp.get_deployment(&dep.guid).await.unwrap();
        assert_eq!((second.state, second.updated), (DeploymentState::Deployed, 2));
        assert_eq!(cp.app_named("web").unwrap().active_deployment, None);
    }

    #[tokio::test]
    async fn test_instances_start_then_run() {
        let cp = InMemoryControlPlane::new();
        let (app, _) = cp.create_app("s", &Application::named("web")).await.unwrap();
        cp.set_current_droplet(&app.guid, "droplet").await.unwrap();
        cp.start_app(&app.guid).await.unwrap();

        let (first, _) = cp.process_instances(&app.guid).await.unwrap();
        assert_eq!(first[0].state, InstanceState::Starting);
        let (second, _) = cp.process_instances(&app.guid).await.unwrap();
        assert_eq!(second[0].state, InstanceState::Running);
    }

    #[tokio::test]
    async fn test_lookup_records_call_and_warnings() {
        let cp = InMemoryControlPlane::new().with_behavior(Behavior {
            lookup_warnings: vec!["deprecated api".to_string()],
            ..Default::default()
        });
        let (found, warnings) = cp.lookup_app("s", "ghost").await.unwrap();
        assert!(found.is_none());
        assert_eq!(warnings.iter().collect::<Vec<_>>(), vec!["deprecated api"]);
        assert_eq!(cp.call_count("lookup_app"), 1);
        assert!(cp.mutating_calls().is_empty());
    }
}
