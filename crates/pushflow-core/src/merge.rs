//! Override merging
//!
//! Applies command-line overrides onto a parsed manifest. Precedence for
//! every option is: explicit flag, then manifest field, then whatever the
//! platform defaults to (left as `None`).
//!
//! Everything here is pure. The input manifest is only borrowed, so an
//! error can never leave it half-modified.

use crate::error::{Result, ValidationError};
use crate::model::{
    Application, BUILDPACK_SENTINELS, DeploymentStrategy, DockerSpec, FlagOverrides,
    HealthCheckType, Manifest,
};
use crate::route::RouteSpec;
use tracing::debug;

/// Merge `overrides` into `manifest`, returning the applications to push.
#[tracing::instrument(skip_all, fields(apps = manifest.len()))]
pub fn merge(manifest: &Manifest, overrides: &FlagOverrides) -> Result<Manifest> {
    validate_flag_combinations(overrides)?;
    validate_scale_overrides(overrides, None)?;

    let selected = select_applications(manifest, overrides)?;

    if let Some(name) = manifest.first_duplicate_name() {
        return Err(ValidationError::DuplicateAppName {
            name: name.to_string(),
        });
    }

    let merged = selected
        .into_iter()
        .map(|app| {
            let app = apply_overrides(app, overrides);
            validate_application(&app)?;
            Ok(app)
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(apps = ?merged.iter().map(|a| &a.name).collect::<Vec<_>>(), "merged manifest");
    Ok(Manifest::new(merged))
}

/// Reject flag combinations that can never be valid, whatever the
/// manifest says.
pub fn validate_flag_combinations(overrides: &FlagOverrides) -> Result<()> {
    let conflict = |a: &str, b: &str| ValidationError::ConflictingFlags {
        flags: vec![a.to_string(), b.to_string()],
    };

    if overrides.no_route && overrides.random_route {
        return Err(conflict("--no-route", "--random-route"));
    }

    if overrides.docker_image.is_some() {
        if !overrides.buildpacks.is_empty() {
            return Err(conflict("--docker-image", "--buildpack"));
        }
        if overrides.path.is_some() {
            return Err(conflict("--docker-image", "--path"));
        }
        if overrides.stack.is_some() {
            return Err(conflict("--docker-image", "--stack"));
        }
        if overrides.droplet_path.is_some() {
            return Err(conflict("--docker-image", "--droplet"));
        }
    } else if overrides.docker_username.is_some() {
        return Err(ValidationError::RequiredFlag {
            flag: "--docker-image".to_string(),
            required_by: "--docker-username".to_string(),
        });
    }

    if overrides.droplet_path.is_some() {
        if overrides.path.is_some() {
            return Err(conflict("--droplet", "--path"));
        }
        if !overrides.buildpacks.is_empty() {
            return Err(conflict("--droplet", "--buildpack"));
        }
    }

    if overrides.health_check_endpoint.is_some()
        && matches!(overrides.health_check_type, Some(t) if t != HealthCheckType::Http)
    {
        return Err(ValidationError::RequiredFlag {
            flag: "--health-check-type=http".to_string(),
            required_by: "--endpoint".to_string(),
        });
    }

    if overrides.no_start && !overrides.strategy.is_none() {
        return Err(conflict("--no-start", "--strategy"));
    }

    if overrides.strategy == DeploymentStrategy::Canary && overrides.instances == Some(0) {
        return Err(conflict("--strategy=canary", "--instances=0"));
    }

    Ok(())
}

/// Check instance, memory and disk overrides.
///
/// `active_deployment` is the guid of a rolling or canary deployment still
/// in progress for the application; while one runs, no scale override is
/// accepted.
pub fn validate_scale_overrides(
    overrides: &FlagOverrides,
    active_deployment: Option<&str>,
) -> Result<()> {
    if let Some(value) = overrides.instances {
        if value < 0 {
            return Err(ValidationError::InstancesOutOfRange { value });
        }
    }
    if overrides.memory.is_some_and(|m| m.is_zero()) {
        return Err(ValidationError::ZeroSize {
            field: "memory".to_string(),
        });
    }
    if overrides.disk.is_some_and(|d| d.is_zero()) {
        return Err(ValidationError::ZeroSize {
            field: "disk".to_string(),
        });
    }

    if let Some(deployment) = active_deployment {
        if overrides.has_scale_overrides() {
            return Err(ValidationError::ScaleConflictsWithDeployment {
                deployment: deployment.to_string(),
                fields: overrides.scale_flags(),
            });
        }
    }

    Ok(())
}

fn select_applications(manifest: &Manifest, overrides: &FlagOverrides) -> Result<Vec<Application>> {
    if manifest.is_empty() {
        return match &overrides.app_name {
            Some(name) => Ok(vec![Application::named(name.clone())]),
            None => Err(ValidationError::MissingName),
        };
    }

    if let Some(name) = &overrides.app_name {
        return manifest
            .app(name)
            .cloned()
            .map(|app| vec![app])
            .ok_or_else(|| ValidationError::AppNotFoundInManifest { name: name.clone() });
    }

    if manifest.len() > 1 {
        let flags = overrides.single_app_flags();
        if !flags.is_empty() {
            return Err(ValidationError::FlagsWithMultipleApps { flags });
        }
    }

    Ok(manifest.applications.clone())
}

fn apply_overrides(mut app: Application, overrides: &FlagOverrides) -> Application {
    if !overrides.buildpacks.is_empty() {
        app.buildpacks = overrides.buildpacks.clone();
        app.buildpack = None;
    }
    if let Some(stack) = &overrides.stack {
        app.stack = Some(stack.clone());
    }
    if let Some(instances) = overrides.instances {
        app.instances = Some(instances);
    }
    if let Some(memory) = overrides.memory {
        app.memory = Some(memory);
    }
    if let Some(disk) = overrides.disk {
        app.disk_quota = Some(disk);
    }
    if let Some(path) = &overrides.path {
        app.path = Some(path.clone());
    }
    if let Some(droplet) = &overrides.droplet_path {
        app.droplet_path = Some(droplet.clone());
    }
    if let Some(command) = &overrides.start_command {
        app.command = Some(command.clone());
    }
    if let Some(timeout) = overrides.health_check_timeout {
        app.timeout = Some(timeout);
    }

    if let Some(check) = overrides.health_check_type {
        app.health_check_type = Some(check);
        if check != HealthCheckType::Http {
            app.health_check_http_endpoint = None;
        }
    }
    if let Some(endpoint) = &overrides.health_check_endpoint {
        app.health_check_http_endpoint = Some(endpoint.clone());
    }
    if app.health_check_type == Some(HealthCheckType::Http)
        && app.health_check_http_endpoint.is_none()
    {
        app.health_check_http_endpoint = Some("/".to_string());
    }

    if let Some(image) = &overrides.docker_image {
        let username = overrides
            .docker_username
            .clone()
            .or_else(|| app.docker.as_ref().and_then(|d| d.username.clone()));
        app.docker = Some(DockerSpec {
            image: image.clone(),
            username,
            password: None,
        });
    }
    if let Some(docker) = app.docker.as_mut() {
        if overrides.docker_password.is_some() {
            docker.password = overrides.docker_password.clone();
        }
    }

    if overrides.no_route {
        app.no_route = true;
        app.random_route = false;
        app.routes.clear();
    }
    if overrides.random_route {
        app.random_route = true;
        app.no_route = false;
    }
    if !app.routes.is_empty() {
        app.random_route = false;
    }

    app
}

/// Post-merge checks on a single application.
pub fn validate_application(app: &Application) -> Result<()> {
    if app.name.is_empty() {
        return Err(ValidationError::MissingName);
    }

    let combination = |a: &str, b: &str| ValidationError::PropertyCombination {
        app: app.name.clone(),
        properties: vec![a.to_string(), b.to_string()],
    };

    if app.is_docker() {
        if !app.effective_buildpacks().is_empty() {
            return Err(combination("docker", "buildpacks"));
        }
        if app.path.is_some() {
            return Err(combination("docker", "path"));
        }
        if app.droplet_path.is_some() {
            return Err(combination("docker", "droplet"));
        }
    }
    if app.no_route && !app.routes.is_empty() {
        return Err(combination("no-route", "routes"));
    }
    if app.no_route && app.random_route {
        return Err(combination("no-route", "random-route"));
    }
    if app.buildpack.is_some() && !app.buildpacks.is_empty() {
        return Err(combination("buildpack", "buildpacks"));
    }

    if app.buildpacks.len() > 1
        && app
            .buildpacks
            .iter()
            .any(|b| BUILDPACK_SENTINELS.contains(&b.as_str()))
    {
        return Err(ValidationError::InvalidBuildpacks {
            app: app.name.clone(),
        });
    }

    if app.health_check_http_endpoint.is_some()
        && app.health_check_type != Some(HealthCheckType::Http)
    {
        return Err(ValidationError::HttpHealthCheckInvalid {
            app: app.name.clone(),
        });
    }

    if let Some(value) = app.instances {
        if value < 0 {
            return Err(ValidationError::InstancesOutOfRange { value });
        }
    }
    if app.memory.is_some_and(|m| m.is_zero()) {
        return Err(ValidationError::ZeroSize {
            field: "memory".to_string(),
        });
    }
    if app.disk_quota.is_some_and(|d| d.is_zero()) {
        return Err(ValidationError::ZeroSize {
            field: "disk_quota".to_string(),
        });
    }

    for route in app.route_strings() {
        route.parse::<RouteSpec>()?;
    }

    if let Some(docker) = &app.docker {
        if docker.username.is_some() && docker.password.is_none() {
            return Err(ValidationError::DockerPasswordNotSet {
                app: app.name.clone(),
            });
        }
    }

    Ok(())
}
