//! [`ControlPlane`] over the Cloud Controller v3 API

use crate::api::*;
use crate::client::{CcConfig, HttpClient, map_reqwest, map_upload_error};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use pushflow_cloud::{
    AppState, CloudError, ControlPlane, DeploymentKind, DeploymentState, DeploymentStatus,
    Domain, Droplet, DropletState, InstanceState, InstanceStats, JobKind, JobRef, JobStatus,
    Lifecycle, Package, PackageKind, PackageState, ProgressCallback, RemoteApp, Reply, Result,
    Route, RouteQuery, RouterKind, ScaleRequest, ServiceInstance,
};
use pushflow_core::{Application, HealthCheckType, Warnings};
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use std::collections::HashMap;
use std::sync::Mutex;

const UPLOAD_CHUNK: usize = 64 * 1024;

/// Cloud Controller backend
pub struct CloudControllerClient {
    http: HttpClient,
    /// Desired instance count per deployment, captured when it was created
    deployment_totals: Mutex<HashMap<String, u32>>,
}

impl CloudControllerClient {
    pub fn new(config: CcConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
            deployment_totals: Mutex::new(HashMap::new()),
        })
    }

    async fn web_process(&self, app_guid: &str) -> Reply<Option<ApiProcess>> {
        optional(
            self.http
                .get(&format!("/v3/apps/{}/processes/web", app_guid))
                .await,
        )
    }

    async fn current_droplet(&self, app_guid: &str) -> Reply<Option<ApiDroplet>> {
        optional(
            self.http
                .get(&format!("/v3/apps/{}/droplets/current", app_guid))
                .await,
        )
    }

    /// The package the current droplet was staged from. Uploaded droplets
    /// have none.
    async fn staged_package(&self, droplet: Option<&ApiDroplet>) -> Reply<Option<ApiPackage>> {
        match droplet.and_then(ApiDroplet::package_guid) {
            Some(guid) => optional(self.http.get(&format!("/v3/packages/{}", guid)).await),
            None => Ok((None, Warnings::new())),
        }
    }

    async fn bound_services(&self, app_guid: &str) -> Reply<Vec<String>> {
        let (bindings, warnings): (BindingsResponse, _) = self
            .http
            .get(&format!(
                "/v3/service_credential_bindings?app_guids={}&type=app&include=service_instance",
                app_guid
            ))
            .await?;
        let names = bindings
            .included
            .service_instances
            .into_iter()
            .map(|i| i.name)
            .collect();
        Ok((names, warnings))
    }

    /// Stream `bits` as the `bits` part of a multipart upload.
    async fn upload(
        &self,
        path: &str,
        file_name: &'static str,
        bits: Bytes,
        progress: ProgressCallback,
    ) -> Result<Bytes> {
        let total = bits.len() as u64;
        let part = Part::stream_with_length(progress_body(bits, progress), total)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(map_reqwest)?;
        let form = Form::new().text("resources", "[]").part("bits", part);

        let response = self
            .http
            .request(Method::POST, path)
            .multipart(form)
            .send()
            .await
            .map_err(map_upload_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::client::status_error(status, &body));
        }
        response.bytes().await.map_err(map_upload_error)
    }

    async fn process_stats(&self, process_path: &str) -> Reply<Vec<InstanceStats>> {
        let (list, warnings): (ListResponse<ApiProcessStats>, _) =
            self.http.get(&format!("{}/stats", process_path)).await?;
        let stats = list
            .resources
            .into_iter()
            .map(|s| InstanceStats {
                index: s.index,
                state: instance_state(&s.state),
                uptime_secs: s.uptime,
            })
            .collect();
        Ok((stats, warnings))
    }

    fn remember_total(&self, deployment_guid: &str, total: u32) {
        if let Ok(mut totals) = self.deployment_totals.lock() {
            totals.insert(deployment_guid.to_string(), total);
        }
    }

    fn total_for(&self, deployment_guid: &str) -> Option<u32> {
        self.deployment_totals
            .lock()
            .ok()
            .and_then(|t| t.get(deployment_guid).copied())
    }

    async fn deployment_status(&self, deployment: ApiDeployment) -> Reply<DeploymentStatus> {
        let mut warnings = Warnings::new();
        let updated = match deployment.new_processes.first() {
            Some(process) => {
                let (stats, w) = self
                    .process_stats(&format!("/v3/processes/{}", process.guid))
                    .await?;
                warnings.extend(w);
                stats
                    .iter()
                    .filter(|s| s.state == InstanceState::Running)
                    .count() as u32
            }
            None => 0,
        };
        let total = self.total_for(&deployment.guid).unwrap_or(updated).max(updated);

        let kind = if deployment.strategy == "canary" {
            DeploymentKind::Canary
        } else {
            DeploymentKind::Rolling
        };
        let state = match (deployment.status.value.as_str(), deployment.status.reason.as_str()) {
            (_, "PAUSED") => DeploymentState::Paused,
            (_, "CANCELED") | (_, "CANCELING") => DeploymentState::Canceled,
            ("FINALIZED", "DEPLOYED") => DeploymentState::Deployed,
            ("FINALIZED", _) => DeploymentState::Failed,
            _ => DeploymentState::Deploying,
        };
        let reason = match state {
            DeploymentState::Failed => Some(deployment.status.reason.clone()),
            _ => None,
        };

        Ok((
            DeploymentStatus {
                guid: deployment.guid,
                kind,
                state,
                updated,
                total,
                reason,
            },
            warnings,
        ))
    }
}

/// Turn a 404 into `None`.
fn optional<T>(result: Reply<T>) -> Reply<Option<T>> {
    match result {
        Ok((value, warnings)) => Ok((Some(value), warnings)),
        Err(CloudError::NotFound(_)) => Ok((None, Warnings::new())),
        Err(e) => Err(e),
    }
}

fn relationships(name: &'static str, guid: &str) -> HashMap<&'static str, Relationship> {
    HashMap::from([(name, Relationship::to(guid))])
}

fn api_lifecycle(app: &Application) -> ApiLifecycle {
    if app.is_docker() {
        ApiLifecycle {
            kind: "docker".to_string(),
            data: LifecycleData::default(),
        }
    } else {
        ApiLifecycle {
            kind: "buildpack".to_string(),
            data: LifecycleData {
                buildpacks: app.requested_buildpacks(),
                stack: app.stack.clone(),
            },
        }
    }
}

fn lifecycle_of(api: &ApiLifecycle, package: Option<&ApiPackage>) -> Lifecycle {
    if api.kind == "docker" {
        Lifecycle::Docker {
            image: package
                .and_then(|p| p.data.image.clone())
                .unwrap_or_default(),
        }
    } else {
        Lifecycle::Buildpack {
            buildpacks: api.data.buildpacks.clone().unwrap_or_default(),
            stack: api.data.stack.clone(),
        }
    }
}

fn droplet_state(state: &str) -> DropletState {
    match state {
        "STAGED" => DropletState::Staged,
        "FAILED" | "EXPIRED" => DropletState::Failed,
        "AWAITING_UPLOAD" => DropletState::AwaitingUpload,
        _ => DropletState::Processing,
    }
}

fn sha256_of(checksum: Option<&Checksum>) -> Option<String> {
    checksum
        .filter(|c| c.kind == "sha256")
        .and_then(|c| c.value.clone())
}

fn instance_state(state: &str) -> InstanceState {
    match state {
        "RUNNING" => InstanceState::Running,
        "CRASHED" => InstanceState::Crashed,
        "STARTING" => InstanceState::Starting,
        _ => InstanceState::Down,
    }
}

fn package_state(state: &str) -> PackageState {
    match state {
        "READY" => PackageState::Ready,
        "FAILED" | "EXPIRED" => PackageState::Failed,
        "AWAITING_UPLOAD" => PackageState::AwaitingUpload,
        _ => PackageState::Processing,
    }
}

fn to_route(route: ApiRoute) -> Route {
    let domain_guid = route
        .relationships
        .domain
        .data
        .map(|d| d.guid)
        .unwrap_or_default();
    let space_guid = route
        .relationships
        .space
        .data
        .map(|d| d.guid)
        .unwrap_or_default();
    // url is "host.domain[:port][/path]"; peel the domain back out of it
    let without_path = route
        .url
        .strip_suffix(route.path.as_str())
        .unwrap_or(&route.url);
    let authority = without_path.split(':').next().unwrap_or(without_path);
    let domain_name = if route.host.is_empty() {
        authority.to_string()
    } else {
        authority
            .strip_prefix(&format!("{}.", route.host))
            .unwrap_or(authority)
            .to_string()
    };

    Route {
        guid: route.guid,
        space_guid,
        domain_guid,
        domain_name,
        host: route.host,
        path: (!route.path.is_empty()).then_some(route.path),
        port: route.port,
    }
}

/// Body that hands the archive to reqwest in chunks, reporting progress
/// as each chunk is pulled.
fn progress_body(bits: Bytes, progress: ProgressCallback) -> reqwest::Body {
    let total = bits.len() as u64;
    let chunks: Vec<Bytes> = (0..bits.len())
        .step_by(UPLOAD_CHUNK)
        .map(|start| bits.slice(start..(start + UPLOAD_CHUNK).min(bits.len())))
        .collect();

    let mut sent = 0u64;
    let body = stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        progress(sent, total);
        Ok::<Bytes, std::io::Error>(chunk)
    }));
    reqwest::Body::wrap_stream(body)
}

#[async_trait]
impl ControlPlane for CloudControllerClient {
    fn name(&self) -> &str {
        "cloud-controller"
    }

    async fn lookup_app(&self, space_guid: &str, name: &str) -> Reply<Option<RemoteApp>> {
        let (list, mut warnings): (ListResponse<ApiApp>, _) = self
            .http
            .get(&format!("/v3/apps?names={}&space_guids={}", name, space_guid))
            .await?;
        let Some(app) = list.resources.into_iter().next() else {
            return Ok((None, warnings));
        };

        let (env, w): (EnvironmentVariables, _) = self
            .http
            .get(&format!("/v3/apps/{}/environment_variables", app.guid))
            .await?;
        warnings.extend(w);
        let (process, w) = self.web_process(&app.guid).await?;
        warnings.extend(w);
        let (droplet, w) = self.current_droplet(&app.guid).await?;
        warnings.extend(w);
        let (package, w) = self.staged_package(droplet.as_ref()).await?;
        warnings.extend(w);
        let (services, w) = self.bound_services(&app.guid).await?;
        warnings.extend(w);
        let (routes, w): (ListResponse<ApiRoute>, _) = self
            .http
            .get(&format!("/v3/apps/{}/routes", app.guid))
            .await?;
        warnings.extend(w);
        let (deployments, w): (ListResponse<ApiDeployment>, _) = self
            .http
            .get(&format!(
                "/v3/deployments?app_guids={}&status_values=ACTIVE",
                app.guid
            ))
            .await?;
        warnings.extend(w);

        let health_check = process.as_ref().and_then(|p| p.health_check.clone());
        let remote = RemoteApp {
            guid: app.guid.clone(),
            name: app.name,
            state: if app.state == "STARTED" {
                AppState::Started
            } else {
                AppState::Stopped
            },
            lifecycle: lifecycle_of(&app.lifecycle, package.as_ref()),
            env: env
                .var
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect(),
            instances: process.as_ref().map(|p| p.instances).unwrap_or(0),
            memory_mb: process.as_ref().and_then(|p| p.memory_in_mb),
            disk_mb: process.as_ref().and_then(|p| p.disk_in_mb),
            health_check_type: health_check
                .as_ref()
                .and_then(|h| h.kind.parse::<HealthCheckType>().ok()),
            health_check_endpoint: health_check.as_ref().and_then(|h| h.data.endpoint.clone()),
            health_check_timeout: health_check.as_ref().and_then(|h| h.data.timeout),
            command: process.as_ref().and_then(|p| p.command.clone()),
            staged_checksum: package
                .as_ref()
                .and_then(|p| sha256_of(p.data.checksum.as_ref())),
            staged_image: package
                .as_ref()
                .and_then(|p| p.data.image.clone())
                .or_else(|| droplet.as_ref().and_then(|d| d.image.clone())),
            droplet_checksum: droplet.as_ref().and_then(|d| sha256_of(d.checksum.as_ref())),
            current_droplet: droplet.map(|d| d.guid),
            routes: routes.resources.into_iter().map(to_route).collect(),
            services,
            active_deployment: deployments.resources.into_iter().next().map(|d| d.guid),
        };
        Ok((Some(remote), warnings))
    }

    async fn create_app(&self, space_guid: &str, app: &Application) -> Reply<RemoteApp> {
        let request = CreateAppRequest {
            name: app.name.clone(),
            relationships: relationships("space", space_guid),
            lifecycle: api_lifecycle(app),
        };
        let (created, warnings): (ApiApp, _) = self.http.post("/v3/apps", &request).await?;
        tracing::info!("Created app {} ({})", created.name, created.guid);
        Ok((
            RemoteApp {
                guid: created.guid,
                name: created.name,
                state: AppState::Stopped,
                lifecycle: lifecycle_of(&created.lifecycle, None),
                ..Default::default()
            },
            warnings,
        ))
    }

    async fn apply_manifest(&self, app_guid: &str, app: &Application) -> Reply<()> {
        let mut warnings = Warnings::new();

        let (_, w) = self
            .http
            .patch(
                &format!("/v3/apps/{}", app_guid),
                &UpdateAppRequest {
                    lifecycle: api_lifecycle(app),
                },
            )
            .await?;
        warnings.extend(w);

        if !app.env.is_empty() {
            let (_, w) = self
                .http
                .patch(
                    &format!("/v3/apps/{}/environment_variables", app_guid),
                    &UpdateEnvironmentRequest { var: &app.env },
                )
                .await?;
            warnings.extend(w);
        }

        let process = UpdateProcessRequest {
            command: app.command.clone(),
            health_check: app.health_check_type.map(|kind| HealthCheck {
                kind: kind.to_string(),
                data: HealthCheckData {
                    endpoint: app.health_check_http_endpoint.clone(),
                    timeout: app.timeout,
                },
            }),
        };
        if !process.is_empty() {
            let (_, w) = self
                .http
                .patch(&format!("/v3/apps/{}/processes/web", app_guid), &process)
                .await?;
            warnings.extend(w);
        }

        Ok(((), warnings))
    }

    async fn create_package(&self, app_guid: &str, kind: &PackageKind) -> Reply<Package> {
        let request = match kind {
            PackageKind::Bits => CreatePackageRequest {
                kind: "bits",
                data: None,
                relationships: relationships("app", app_guid),
            },
            PackageKind::Docker {
                image,
                username,
                password,
            } => CreatePackageRequest {
                kind: "docker",
                data: Some(DockerData {
                    image: image.clone(),
                    username: username.clone(),
                    password: password.clone(),
                }),
                relationships: relationships("app", app_guid),
            },
        };
        let (package, warnings): (ApiPackage, _) = self.http.post("/v3/packages", &request).await?;
        Ok((
            Package {
                guid: package.guid,
                state: package_state(&package.state),
            },
            warnings,
        ))
    }

    async fn upload_bits(
        &self,
        package_guid: &str,
        bits: Bytes,
        progress: ProgressCallback,
    ) -> Reply<Package> {
        let body = self
            .upload(
                &format!("/v3/packages/{}/upload", package_guid),
                "application.zip",
                bits,
                progress,
            )
            .await?;
        let package: ApiPackage = serde_json::from_slice(&body)?;
        Ok((
            Package {
                guid: package.guid,
                state: package_state(&package.state),
            },
            Warnings::new(),
        ))
    }

    async fn create_build(&self, package_guid: &str) -> Reply<JobRef> {
        let request = CreateBuildRequest {
            package: GuidRef {
                guid: package_guid.to_string(),
            },
        };
        let (build, warnings): (ApiBuild, _) = self.http.post("/v3/builds", &request).await?;
        Ok((JobRef::build(build.guid), warnings))
    }

    async fn poll_job(&self, job: &JobRef) -> Reply<JobStatus> {
        match job.kind {
            JobKind::Build => {
                let (build, warnings): (ApiBuild, _) =
                    self.http.get(&format!("/v3/builds/{}", job.guid)).await?;
                let status = match build.state.as_str() {
                    "STAGED" => JobStatus::Succeeded {
                        droplet: build.droplet.map(|d| d.guid),
                    },
                    "FAILED" => JobStatus::Failed {
                        reason: build.error.unwrap_or_else(|| "staging failed".to_string()),
                    },
                    _ => JobStatus::Processing,
                };
                Ok((status, warnings))
            }
            JobKind::Package => {
                let (package, warnings): (ApiPackage, _) =
                    self.http.get(&format!("/v3/packages/{}", job.guid)).await?;
                let status = match package_state(&package.state) {
                    PackageState::Ready => JobStatus::Succeeded { droplet: None },
                    PackageState::Failed => JobStatus::Failed {
                        reason: format!("package {} is {}", package.guid, package.state),
                    },
                    _ => JobStatus::Processing,
                };
                Ok((status, warnings))
            }
            JobKind::Droplet => {
                let (droplet, warnings): (ApiDroplet, _) =
                    self.http.get(&format!("/v3/droplets/{}", job.guid)).await?;
                let status = match droplet_state(&droplet.state) {
                    DropletState::Staged => JobStatus::Succeeded {
                        droplet: Some(droplet.guid),
                    },
                    DropletState::Failed => JobStatus::Failed {
                        reason: format!("droplet {} is {}", droplet.guid, droplet.state),
                    },
                    _ => JobStatus::Processing,
                };
                Ok((status, warnings))
            }
        }
    }

    async fn create_droplet(&self, app_guid: &str) -> Reply<Droplet> {
        let request = CreateDropletRequest {
            relationships: relationships("app", app_guid),
        };
        let (droplet, warnings): (ApiDroplet, _) =
            self.http.post("/v3/droplets", &request).await?;
        Ok((
            Droplet {
                state: droplet_state(&droplet.state),
                guid: droplet.guid,
            },
            warnings,
        ))
    }

    async fn upload_droplet(
        &self,
        droplet_guid: &str,
        bits: Bytes,
        progress: ProgressCallback,
    ) -> Reply<JobRef> {
        self.upload(
            &format!("/v3/droplets/{}/upload", droplet_guid),
            "droplet.tgz",
            bits,
            progress,
        )
        .await?;
        Ok((JobRef::droplet(droplet_guid), Warnings::new()))
    }

    async fn set_current_droplet(&self, app_guid: &str, droplet_guid: &str) -> Reply<()> {
        self.http
            .patch(
                &format!("/v3/apps/{}/relationships/current_droplet", app_guid),
                &Relationship::to(droplet_guid),
            )
            .await
    }

    async fn list_domains(&self, org_guid: &str) -> Reply<Vec<Domain>> {
        let (default, mut warnings) = optional::<ApiDomain>(
            self.http
                .get(&format!("/v3/organizations/{}/domains/default", org_guid))
                .await,
        )?;
        let (list, w): (ListResponse<ApiDomain>, _) = self
            .http
            .get(&format!("/v3/organizations/{}/domains", org_guid))
            .await?;
        warnings.extend(w);

        let default_guid = default.as_ref().map(|d| d.guid.clone());
        let mut domains: Vec<Domain> = list
            .resources
            .into_iter()
            .map(|d| Domain {
                guid: d.guid,
                name: d.name,
                internal: d.internal,
                router: if d.supported_protocols.iter().any(|p| p == "tcp") {
                    RouterKind::Tcp
                } else {
                    RouterKind::Http
                },
            })
            .collect();
        if let Some(guid) = default_guid {
            if let Some(pos) = domains.iter().position(|d| d.guid == guid) {
                let domain = domains.remove(pos);
                domains.insert(0, domain);
            }
        }
        Ok((domains, warnings))
    }

    async fn find_route(&self, query: &RouteQuery) -> Reply<Option<Route>> {
        let mut path = format!(
            "/v3/routes?domain_guids={}&hosts={}&paths={}",
            query.domain_guid,
            query.host,
            query.path.as_deref().unwrap_or("")
        );
        if let Some(port) = query.port {
            path.push_str(&format!("&ports={}", port));
        }
        let (list, warnings): (ListResponse<ApiRoute>, _) = self.http.get(&path).await?;
        Ok((list.resources.into_iter().next().map(to_route), warnings))
    }

    async fn create_route(&self, space_guid: &str, query: &RouteQuery) -> Reply<Route> {
        let mut rels = relationships("space", space_guid);
        rels.insert("domain", Relationship::to(&query.domain_guid));
        let request = CreateRouteRequest {
            host: query.host.clone(),
            path: query.path.clone(),
            port: query.port,
            relationships: rels,
        };
        let (route, warnings): (ApiRoute, _) = self.http.post("/v3/routes", &request).await?;
        Ok((to_route(route), warnings))
    }

    async fn map_route(&self, app_guid: &str, route_guid: &str) -> Reply<()> {
        let request = InsertDestinationsRequest {
            destinations: vec![Destination {
                app: GuidRef {
                    guid: app_guid.to_string(),
                },
            }],
        };
        self.http
            .empty(
                self.http
                    .request(Method::POST, &format!("/v3/routes/{}/destinations", route_guid))
                    .json(&request),
            )
            .await
    }

    async fn unmap_route(&self, app_guid: &str, route_guid: &str) -> Reply<()> {
        let (list, mut warnings): (DestinationsResponse, _) = self
            .http
            .get(&format!("/v3/routes/{}/destinations", route_guid))
            .await?;
        let destinations = list
            .destinations
            .into_iter()
            .filter(|d| d.app.guid == app_guid);
        for destination in destinations {
            let (_, w) = self
                .http
                .empty(self.http.request(
                    Method::DELETE,
                    &format!("/v3/routes/{}/destinations/{}", route_guid, destination.guid),
                ))
                .await?;
            warnings.extend(w);
        }
        Ok(((), warnings))
    }

    async fn find_service_instance(
        &self,
        space_guid: &str,
        name: &str,
    ) -> Reply<Option<ServiceInstance>> {
        let (list, warnings): (ListResponse<ApiServiceInstance>, _) = self
            .http
            .get(&format!(
                "/v3/service_instances?names={}&space_guids={}",
                name, space_guid
            ))
            .await?;
        let found = list.resources.into_iter().next().map(|i| ServiceInstance {
            guid: i.guid,
            name: i.name,
        });
        Ok((found, warnings))
    }

    async fn bind_service(&self, app_guid: &str, instance_guid: &str) -> Reply<()> {
        let mut rels = relationships("app", app_guid);
        rels.insert("service_instance", Relationship::to(instance_guid));
        let request = CreateBindingRequest {
            kind: "app",
            relationships: rels,
        };
        self.http
            .empty(
                self.http
                    .request(Method::POST, "/v3/service_credential_bindings")
                    .json(&request),
            )
            .await
    }

    async fn scale_process(
        &self,
        app_guid: &str,
        process_type: &str,
        scale: &ScaleRequest,
    ) -> Reply<()> {
        self.http
            .empty(
                self.http
                    .request(
                        Method::POST,
                        &format!(
                            "/v3/apps/{}/processes/{}/actions/scale",
                            app_guid, process_type
                        ),
                    )
                    .json(scale),
            )
            .await
    }

    async fn start_app(&self, app_guid: &str) -> Reply<()> {
        self.http
            .empty(
                self.http
                    .request(Method::POST, &format!("/v3/apps/{}/actions/start", app_guid)),
            )
            .await
    }

    async fn restart_app(&self, app_guid: &str) -> Reply<()> {
        self.http
            .empty(
                self.http
                    .request(Method::POST, &format!("/v3/apps/{}/actions/restart", app_guid)),
            )
            .await
    }

    async fn create_deployment(
        &self,
        app_guid: &str,
        droplet_guid: Option<&str>,
        kind: DeploymentKind,
    ) -> Reply<DeploymentStatus> {
        let (process, mut warnings) = self.web_process(app_guid).await?;
        let request = CreateDeploymentRequest {
            droplet: droplet_guid.map(|guid| GuidRef {
                guid: guid.to_string(),
            }),
            strategy: kind.to_string(),
            relationships: relationships("app", app_guid),
        };
        let (deployment, w): (ApiDeployment, _) =
            self.http.post("/v3/deployments", &request).await?;
        warnings.extend(w);

        let total = process.map(|p| p.instances).unwrap_or(1).max(1);
        self.remember_total(&deployment.guid, total);
        let (status, w) = self.deployment_status(deployment).await?;
        warnings.extend(w);
        Ok((status, warnings))
    }

    async fn get_deployment(&self, deployment_guid: &str) -> Reply<DeploymentStatus> {
        let (deployment, mut warnings): (ApiDeployment, _) = self
            .http
            .get(&format!("/v3/deployments/{}", deployment_guid))
            .await?;
        let (status, w) = self.deployment_status(deployment).await?;
        warnings.extend(w);
        Ok((status, warnings))
    }

    async fn cancel_deployment(&self, deployment_guid: &str) -> Reply<()> {
        self.http
            .empty(self.http.request(
                Method::POST,
                &format!("/v3/deployments/{}/actions/cancel", deployment_guid),
            ))
            .await
    }

    async fn process_instances(&self, app_guid: &str) -> Reply<Vec<InstanceStats>> {
        self.process_stats(&format!("/v3/apps/{}/processes/web", app_guid))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_route_splits_url() {
        let route = ApiRoute {
            guid: "r1".into(),
            host: "web".into(),
            path: "/api".into(),
            port: None,
            url: "web.apps.example.com/api".into(),
            relationships: RouteRelationships {
                space: Relationship::to("s1"),
                domain: Relationship::to("d1"),
            },
        };
        let route = to_route(route);
        assert_eq!(route.domain_name, "apps.example.com");
        assert_eq!(route.path.as_deref(), Some("/api"));
        assert_eq!(route.url(), "web.apps.example.com/api");
    }

    #[test]
    fn test_to_route_tcp() {
        let route = ApiRoute {
            guid: "r2".into(),
            host: String::new(),
            path: String::new(),
            port: Some(1024),
            url: "tcp.example.com:1024".into(),
            relationships: RouteRelationships {
                space: Relationship::to("s1"),
                domain: Relationship::to("d2"),
            },
        };
        let route = to_route(route);
        assert_eq!(route.domain_name, "tcp.example.com");
        assert_eq!(route.path, None);
        assert_eq!(route.port, Some(1024));
    }

    #[test]
    fn test_droplet_package_link() {
        let staged: ApiDroplet = serde_json::from_value(serde_json::json!({
            "guid": "droplet-1",
            "state": "STAGED",
            "links": {"package": {"href": "https://api.example.com/v3/packages/pkg-1"}}
        }))
        .unwrap();
        assert_eq!(staged.package_guid(), Some("pkg-1"));

        let uploaded: ApiDroplet =
            serde_json::from_value(serde_json::json!({"guid": "droplet-2"})).unwrap();
        assert_eq!(uploaded.package_guid(), None);
        assert_eq!(droplet_state(&uploaded.state), DropletState::Processing);
    }

    #[test]
    fn test_api_lifecycle() {
        let app = Application {
            buildpacks: vec!["go_buildpack".into()],
            stack: Some("cflinuxfs4".into()),
            ..Application::named("api")
        };
        let lifecycle = api_lifecycle(&app);
        assert_eq!(lifecycle.kind, "buildpack");
        assert_eq!(lifecycle.data.buildpacks, Some(vec!["go_buildpack".to_string()]));
    }
}
