//! Control plane selection

use anyhow::Context;
use pushflow_cloud::{ControlPlane, Domain, InMemoryControlPlane, Target};
use pushflow_cloud_cc::{CcConfig, CloudControllerClient};
use pushflow_config::TargetConfig;
use std::sync::Arc;

/// Shared domain of the simulated platform used by `--dry-run`
pub const DRY_RUN_DOMAIN: &str = "apps.pushflow.local";

pub struct Session {
    pub control_plane: Arc<dyn ControlPlane>,
    pub target: Target,
}

/// Connect to the targeted platform, or to an empty simulated one.
pub fn connect(dry_run: bool) -> anyhow::Result<Session> {
    let config = TargetConfig::load().context("Failed to load target")?;

    if dry_run {
        let org = config.org_guid.clone().unwrap_or_else(|| "dry-run-org".to_string());
        let space = config
            .space_guid
            .clone()
            .unwrap_or_else(|| "dry-run-space".to_string());
        let target = Target::new(
            org.clone(),
            config.org_name.clone().unwrap_or(org),
            space.clone(),
            config.space_name.clone().unwrap_or(space),
        );
        let control_plane =
            InMemoryControlPlane::new().with_domain(Domain::http("dry-run-domain", DRY_RUN_DOMAIN));
        tracing::info!("Dry run against the in-memory control plane");
        return Ok(Session {
            control_plane: Arc::new(control_plane),
            target,
        });
    }

    let resolved = config.require_complete()?;
    let client = CloudControllerClient::new(CcConfig::new(&resolved.api, &resolved.token))
        .with_context(|| format!("Failed to create API client for {}", resolved.api))?;
    tracing::info!("Using API endpoint {}", resolved.api);

    Ok(Session {
        control_plane: Arc::new(client),
        target: Target::new(
            resolved.org_guid,
            resolved.org_name,
            resolved.space_guid,
            resolved.space_name,
        ),
    })
}
