//! Plan builder
//!
//! Turns a manifest and command-line overrides into one [`PushPlan`] per
//! application. Only read operations of the control plane are used; the
//! remote side is never changed while planning.

use crate::change::{Change, ChangeSet};
use crate::error::{PushError, ResolutionError, Result};
use crate::plan::{PlanBatch, PlanFailure, PlanParts, PushPlan};
use crate::routes::{RandomWords, RouteWords, bind_routes, desired_routes, stale_routes};
use pushflow_bits::{BitsArchive, archive_path, read_droplet};
use pushflow_cloud::{
    ControlPlane, Domain, Lifecycle, RemoteApp, ScaleRequest, ServiceInstance, Target,
};
use pushflow_core::{
    Application, FlagOverrides, Manifest, ValidationError, Warnings, merge,
    validate_scale_overrides,
};
use std::path::{Path, PathBuf};

const BUILDPACK_DEPRECATION: &str = "Deprecation warning: Use of 'buildpack' attribute in manifest is deprecated in favor of 'buildpacks'.";

/// Build plans for every application of `manifest`.
pub async fn create_push_plans(
    control_plane: &dyn ControlPlane,
    target: &Target,
    manifest: &Manifest,
    overrides: &FlagOverrides,
) -> Result<PlanBatch> {
    PlanBuilder::new(control_plane, target)
        .build(manifest, overrides)
        .await
}

/// Configurable plan builder
pub struct PlanBuilder<'a> {
    control_plane: &'a dyn ControlPlane,
    target: &'a Target,
    words: Box<dyn RouteWords>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(control_plane: &'a dyn ControlPlane, target: &'a Target) -> Self {
        Self {
            control_plane,
            target,
            words: Box::new(RandomWords),
        }
    }

    /// Use `words` for random routes instead of picking at random.
    pub fn with_route_words(mut self, words: impl RouteWords + 'static) -> Self {
        self.words = Box::new(words);
        self
    }

    /// Merge, then plan each application independently.
    ///
    /// Fails as a whole only when merging fails or the domains of the
    /// organization cannot be listed. Per-application failures end up in
    /// [`PlanBatch::failures`].
    #[tracing::instrument(skip_all, fields(target = %self.target))]
    pub async fn build(&self, manifest: &Manifest, overrides: &FlagOverrides) -> Result<PlanBatch> {
        let merged = merge(manifest, overrides)?;
        let mut batch = PlanBatch::default();

        let (domains, w) = self
            .control_plane
            .list_domains(&self.target.org_guid)
            .await?;
        batch.warnings.extend(w);

        for (position, app) in merged.applications.into_iter().enumerate() {
            let app_name = app.name.clone();
            match self
                .plan_app(position, app, overrides, &domains, &mut batch.warnings)
                .await
            {
                Ok(plan) => {
                    tracing::info!(
                        "Planned {}: {}",
                        plan.app_name(),
                        plan.changes().summary()
                    );
                    batch.plans.push(plan);
                }
                Err(error) => {
                    tracing::warn!("Could not plan {}: {}", app_name, error);
                    batch.failures.push(PlanFailure {
                        position,
                        app_name,
                        error,
                    });
                }
            }
        }

        Ok(batch)
    }

    async fn plan_app(
        &self,
        position: usize,
        app: Application,
        overrides: &FlagOverrides,
        domains: &[Domain],
        warnings: &mut Warnings,
    ) -> Result<PushPlan> {
        if app.buildpack.is_some() {
            warnings.push(BUILDPACK_DEPRECATION);
        }

        let (remote, w) = self
            .control_plane
            .lookup_app(&self.target.space_guid, &app.name)
            .await?;
        warnings.extend(w);

        if let Some(remote) = &remote {
            check_active_deployment(&app.name, remote, overrides)?;
        }

        let queries = desired_routes(
            &app,
            remote.as_ref(),
            domains,
            self.target,
            self.words.as_ref(),
        )?;
        let routes = bind_routes(
            self.control_plane,
            self.target,
            remote.as_ref(),
            queries,
            warnings,
        )
        .await?;
        let unmap_routes = stale_routes(&app, remote.as_ref());
        let services = self
            .resolve_services(&app, remote.as_ref(), warnings)
            .await?;

        let (bits, droplet) = match &app.droplet_path {
            Some(path) => (None, Some(load_droplet(path).await?)),
            None if app.is_docker() => (None, None),
            None => (Some(archive_app(&app).await?), None),
        };

        let mut changes = ChangeSet::new();
        if remote.is_none() {
            changes.push(Change::CreateApp);
        }
        diff_settings(&app, remote.as_ref(), &mut changes);
        for instance in &services {
            changes.push(Change::BindService {
                name: instance.name.clone(),
                guid: instance.guid.clone(),
            });
        }

        let package_changed = diff_package(
            &app,
            remote.as_ref(),
            bits.as_ref(),
            droplet.as_ref(),
            &mut changes,
        );
        // an uploaded droplet is already staged
        if package_changed && droplet.is_none() && !overrides.no_start {
            changes.push(Change::Stage);
        }

        for binding in routes.iter().filter(|b| !b.mapped) {
            changes.push(Change::MapRoute {
                route: binding.url(),
                create: binding.route_guid.is_none(),
            });
        }
        for route in &unmap_routes {
            changes.push(Change::UnmapRoute { route: route.url() });
        }

        if !overrides.no_start {
            match &remote {
                None => changes.push(Change::Start),
                Some(r) if !r.is_started() => changes.push(Change::Start),
                Some(_) => {
                    if package_changed || changes.any(Change::requires_restart) {
                        changes.push(Change::Restart);
                    }
                }
            }
        }

        Ok(PushPlan::new(PlanParts {
            position,
            target: self.target.clone(),
            app_guid: remote.map(|r| r.guid),
            routes,
            unmap_routes,
            services,
            changes,
            strategy: overrides.strategy,
            no_start: overrides.no_start,
            bits: bits.filter(|_| package_changed),
            droplet: droplet.filter(|_| package_changed),
            app,
        }))
    }

    /// Look up the service instances the app lists but is not bound to.
    async fn resolve_services(
        &self,
        app: &Application,
        remote: Option<&RemoteApp>,
        warnings: &mut Warnings,
    ) -> Result<Vec<ServiceInstance>> {
        let mut instances: Vec<ServiceInstance> = Vec::new();
        for name in &app.services {
            if remote.is_some_and(|r| r.has_service(name))
                || instances.iter().any(|i| i.name == *name)
            {
                continue;
            }
            let (found, w) = self
                .control_plane
                .find_service_instance(&self.target.space_guid, name)
                .await?;
            warnings.extend(w);
            let instance = found.ok_or_else(|| ResolutionError::ServiceInstanceNotFound {
                app: app.name.clone(),
                service: name.clone(),
            })?;
            instances.push(instance);
        }
        Ok(instances)
    }
}

/// Scale overrides cannot be combined with a deployment still running.
fn check_active_deployment(
    app_name: &str,
    remote: &RemoteApp,
    overrides: &FlagOverrides,
) -> Result<()> {
    match validate_scale_overrides(overrides, remote.active_deployment.as_deref()) {
        Ok(()) => Ok(()),
        Err(ValidationError::ScaleConflictsWithDeployment { deployment, fields }) => {
            Err(ResolutionError::ScaleConflictsWithDeployment {
                app: app_name.to_string(),
                deployment,
                fields,
            }
            .into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn archive_app(app: &Application) -> Result<BitsArchive> {
    let path = app.path.clone().unwrap_or_else(|| PathBuf::from("."));
    tokio::task::spawn_blocking(move || archive_path(&path))
        .await
        .map_err(|e| PushError::Bits(e.to_string()))?
        .map_err(PushError::from)
}

async fn load_droplet(path: &Path) -> Result<BitsArchive> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_droplet(&path))
        .await
        .map_err(|e| PushError::Bits(e.to_string()))?
        .map_err(PushError::from)
}

/// Record setting changes. A create plan is diffed against an empty app.
fn diff_settings(app: &Application, remote: Option<&RemoteApp>, changes: &mut ChangeSet) {
    let empty = RemoteApp::default();
    let remote = remote.unwrap_or(&empty);

    if !app.is_docker() {
        let (remote_buildpacks, remote_stack) = match &remote.lifecycle {
            Lifecycle::Buildpack { buildpacks, stack } => (buildpacks.as_slice(), stack.as_deref()),
            Lifecycle::Docker { .. } => (&[][..], None),
        };
        let requested = app.requested_buildpacks();
        let buildpacks_changed = requested
            .as_deref()
            .is_some_and(|b| b != remote_buildpacks);
        let stack_changed = app.stack.is_some() && app.stack.as_deref() != remote_stack;
        if buildpacks_changed || stack_changed || remote.lifecycle.is_docker() {
            changes.push(Change::Lifecycle {
                buildpacks: requested.unwrap_or_else(|| remote_buildpacks.to_vec()),
                stack: app.stack.clone(),
            });
        }
    }

    let mut keys: Vec<String> = app
        .env
        .iter()
        .filter(|(k, v)| remote.env.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    if !keys.is_empty() {
        keys.sort();
        changes.push(Change::Env { keys });
    }

    let scale = ScaleRequest {
        instances: app
            .instance_count()
            .filter(|n| *n != remote.instances || remote.guid.is_empty()),
        memory_mb: app
            .memory
            .map(|m| m.get())
            .filter(|m| Some(*m) != remote.memory_mb),
        disk_mb: app
            .disk_quota
            .map(|d| d.get())
            .filter(|d| Some(*d) != remote.disk_mb),
    };
    if !scale.is_empty() {
        changes.push(Change::Scale(scale));
    }

    let kind = app
        .health_check_type
        .filter(|t| Some(*t) != remote.health_check_type);
    let endpoint = app
        .health_check_http_endpoint
        .clone()
        .filter(|e| Some(e) != remote.health_check_endpoint.as_ref());
    let timeout = app.timeout.filter(|t| Some(*t) != remote.health_check_timeout);
    if kind.is_some() || endpoint.is_some() || timeout.is_some() {
        changes.push(Change::HealthCheck {
            kind,
            endpoint,
            timeout,
        });
    }

    if let Some(command) = &app.command {
        if remote.command.as_ref() != Some(command) {
            changes.push(Change::Command {
                command: command.clone(),
            });
        }
    }
}

/// Record a new package when the bits, droplet or image differ from what
/// the current droplet was staged from. Returns whether one is needed.
///
/// Only the current droplet counts: bits uploaded by a push whose staging
/// failed, timed out or was cancelled are uploaded and staged again.
fn diff_package(
    app: &Application,
    remote: Option<&RemoteApp>,
    bits: Option<&BitsArchive>,
    droplet: Option<&BitsArchive>,
    changes: &mut ChangeSet,
) -> bool {
    let staged = remote.is_some_and(RemoteApp::is_staged);

    if let Some(docker) = &app.docker {
        let current = remote.and_then(|r| r.staged_image.as_deref());
        if !staged || current != Some(docker.image.as_str()) {
            changes.push(Change::DockerPackage {
                image: docker.image.clone(),
            });
            return true;
        }
        return false;
    }

    if let Some(droplet) = droplet {
        let current = remote.and_then(|r| r.droplet_checksum.as_deref());
        if !staged || current != Some(droplet.sha256.as_str()) {
            changes.push(Change::UploadDroplet {
                sha256: droplet.sha256.clone(),
                size: droplet.size(),
            });
            return true;
        }
        return false;
    }

    let Some(bits) = bits else {
        return false;
    };
    let current = remote.and_then(|r| r.staged_checksum.as_deref());
    if !staged || current != Some(bits.sha256.as_str()) {
        tracing::debug!(
            "Bits of {} changed ({} -> {})",
            app.name,
            current.unwrap_or("none"),
            bits.sha256
        );
        changes.push(Change::UploadBits {
            sha256: bits.sha256.clone(),
            size: bits.size(),
        });
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushflow_cloud::{AppState, Domain, InMemoryControlPlane};
    use pushflow_core::{DockerSpec, HealthCheckType, Megabytes};
    use std::collections::HashMap;

    fn remote_app() -> RemoteApp {
        RemoteApp {
            guid: "app-1".into(),
            name: "web".into(),
            state: AppState::Started,
            lifecycle: Lifecycle::Buildpack {
                buildpacks: vec!["ruby_buildpack".into()],
                stack: Some("cflinuxfs4".into()),
            },
            env: HashMap::from([("RACK_ENV".to_string(), "production".to_string())]),
            instances: 2,
            memory_mb: Some(512),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_setting_changes() {
        let app = Application {
            buildpacks: vec!["ruby_buildpack".into()],
            env: HashMap::from([("RACK_ENV".to_string(), "production".to_string())]),
            instances: Some(2),
            memory: Some(Megabytes::new(512)),
            ..Application::named("web")
        };
        let mut changes = ChangeSet::new();
        diff_settings(&app, Some(&remote_app()), &mut changes);
        assert!(changes.is_empty(), "unexpected changes: {:?}", changes);
    }

    #[test]
    fn test_setting_changes() {
        let app = Application {
            buildpacks: vec!["go_buildpack".into()],
            env: HashMap::from([
                ("RACK_ENV".to_string(), "staging".to_string()),
                ("NEW".to_string(), "1".to_string()),
            ]),
            instances: Some(3),
            health_check_type: Some(HealthCheckType::Http),
            health_check_http_endpoint: Some("/health".into()),
            command: Some("bin/start".into()),
            ..Application::named("web")
        };
        let mut changes = ChangeSet::new();
        diff_settings(&app, Some(&remote_app()), &mut changes);

        let changes: Vec<&Change> = changes.iter().collect();
        assert_eq!(
            changes[0],
            &Change::Lifecycle {
                buildpacks: vec!["go_buildpack".into()],
                stack: None
            }
        );
        assert_eq!(
            changes[1],
            &Change::Env {
                keys: vec!["NEW".into(), "RACK_ENV".into()]
            }
        );
        assert_eq!(
            changes[2],
            &Change::Scale(ScaleRequest {
                instances: Some(3),
                memory_mb: None,
                disk_mb: None
            })
        );
        assert!(matches!(changes[3], Change::HealthCheck { .. }));
        assert_eq!(
            changes[4],
            &Change::Command {
                command: "bin/start".into()
            }
        );
    }

    #[test]
    fn test_docker_package_diff() {
        let app = Application {
            docker: Some(DockerSpec {
                image: "nginx:1.27".into(),
                ..Default::default()
            }),
            ..Application::named("proxy")
        };
        let mut remote = RemoteApp {
            guid: "app-2".into(),
            current_droplet: Some("droplet-1".into()),
            staged_image: Some("nginx:1.27".into()),
            ..Default::default()
        };

        let mut changes = ChangeSet::new();
        assert!(!diff_package(&app, Some(&remote), None, None, &mut changes));

        remote.staged_image = Some("nginx:1.26".into());
        assert!(diff_package(&app, Some(&remote), None, None, &mut changes));
        assert_eq!(
            changes.iter().next(),
            Some(&Change::DockerPackage {
                image: "nginx:1.27".into()
            })
        );
    }

    fn archive(bytes: &'static [u8]) -> BitsArchive {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bits.bin");
        std::fs::write(&path, bytes).unwrap();
        read_droplet(&path).unwrap()
    }

    #[test]
    fn test_bits_diff_against_staged_package() {
        let app = Application::named("web");
        let bits = archive(b"new bits");
        let mut remote = RemoteApp {
            guid: "app-1".into(),
            current_droplet: Some("droplet-1".into()),
            staged_checksum: Some(bits.sha256.clone()),
            ..Default::default()
        };

        let mut changes = ChangeSet::new();
        assert!(!diff_package(&app, Some(&remote), Some(&bits), None, &mut changes));

        // same bits uploaded, but the droplet still runs the old ones
        remote.staged_checksum = Some("old".into());
        assert!(diff_package(&app, Some(&remote), Some(&bits), None, &mut changes));
        assert!(changes.any(|c| matches!(c, Change::UploadBits { .. })));
    }

    #[test]
    fn test_droplet_diff() {
        let app = Application::named("web");
        let droplet = archive(b"droplet");
        let mut remote = RemoteApp {
            guid: "app-1".into(),
            current_droplet: Some("droplet-1".into()),
            droplet_checksum: Some(droplet.sha256.clone()),
            ..Default::default()
        };

        let mut changes = ChangeSet::new();
        assert!(!diff_package(&app, Some(&remote), None, Some(&droplet), &mut changes));

        remote.droplet_checksum = Some("other".into());
        assert!(diff_package(&app, Some(&remote), None, Some(&droplet), &mut changes));
        assert_eq!(
            changes.iter().next(),
            Some(&Change::UploadDroplet {
                sha256: droplet.sha256.clone(),
                size: 7
            })
        );
    }

    #[tokio::test]
    async fn test_merge_failure_makes_no_remote_call() {
        let cp = InMemoryControlPlane::new().with_domain(Domain::http("d1", "apps.example.com"));
        let target = Target::new("org-1", "acme", "space-1", "dev");
        let manifest = Manifest::new(vec![Application::named("web")]);
        let overrides = FlagOverrides {
            instances: Some(-1),
            ..Default::default()
        };

        let err = create_push_plans(&cp, &target, &manifest, &overrides)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PushError::Validation(ValidationError::InstancesOutOfRange { value: -1 })
        );
        assert!(cp.calls().is_empty());
    }
}
