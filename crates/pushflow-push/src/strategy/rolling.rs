//! Rolling strategy: the platform replaces instances one at a time

use super::monitor::{InstanceMonitor, check_instances};
use super::{DeploymentContext, DeploymentExecutor};
use crate::actualizer::log_cleanup_failure;
use crate::error::{Result, StagingError, TimeoutError};
use crate::event::PushEvent;
use async_trait::async_trait;
use pushflow_cloud::{DeploymentKind, DeploymentState, DeploymentStatus};
use pushflow_core::DeploymentStrategy;
use tokio::time::Instant;
use tracing::info;

/// Drives a rolling deployment to completion
pub struct RollingDeploymentExecutor;

impl RollingDeploymentExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RollingDeploymentExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeploymentExecutor for RollingDeploymentExecutor {
    fn strategy(&self) -> DeploymentStrategy {
        DeploymentStrategy::Rolling
    }

    async fn execute(&self, ctx: &DeploymentContext<'_>) -> Result<()> {
        let status = follow_deployment(ctx, DeploymentKind::Rolling).await?;
        info!(
            "Rolling deployment {} of {} finished: {}/{} instances",
            status.guid, ctx.app_name, status.updated, status.total
        );
        Ok(())
    }
}

/// Create a deployment and poll it until it is deployed or paused.
///
/// Instances are checked between polls; a crash or flapping cancels the
/// deployment and ends the push.
pub(crate) async fn follow_deployment(
    ctx: &DeploymentContext<'_>,
    kind: DeploymentKind,
) -> Result<DeploymentStatus> {
    let strategy = match kind {
        DeploymentKind::Rolling => DeploymentStrategy::Rolling,
        DeploymentKind::Canary => DeploymentStrategy::Canary,
    };
    ctx.emit(PushEvent::Deploying { strategy }).await;

    let (mut status, w) = ctx
        .control_plane
        .create_deployment(ctx.app_guid, ctx.droplet, kind)
        .await?;
    ctx.record(w);
    info!(
        "Created {} deployment {} for {} ({} instances)",
        kind, status.guid, ctx.app_name, status.total
    );

    let timeout = ctx.config.startup_timeout;
    let deadline = Instant::now() + timeout;
    let mut monitor = InstanceMonitor::new();
    let mut reported = 0;

    loop {
        if status.updated > reported {
            reported = status.updated;
            ctx.emit(PushEvent::InstancesReplaced {
                updated: status.updated,
                total: status.total,
            })
            .await;
        }

        match status.state {
            DeploymentState::Deployed | DeploymentState::Paused => return Ok(status),
            DeploymentState::Failed | DeploymentState::Canceled => {
                let outcome = match status.state {
                    DeploymentState::Canceled => "canceled",
                    _ => "failed",
                };
                let reason = status
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("deployment {} {}", status.guid, outcome));
                return Err(StagingError::DeploymentFailed {
                    app: ctx.app_name.to_string(),
                    reason,
                }
                .into());
            }
            DeploymentState::Deploying => {}
        }

        if let Err(err) = check_instances(ctx, &mut monitor).await {
            cancel(ctx, &status.guid).await;
            return Err(err);
        }
        if Instant::now() >= deadline {
            cancel(ctx, &status.guid).await;
            return Err(TimeoutError::Deployment {
                app: ctx.app_name.to_string(),
                timeout,
            }
            .into());
        }

        ctx.pause().await;
        let (next, w) = ctx.control_plane.get_deployment(&status.guid).await?;
        ctx.record(w);
        status = next;
    }
}

/// Stop a deployment; the error being reported already ends the push.
pub(crate) async fn cancel(ctx: &DeploymentContext<'_>, deployment_guid: &str) {
    info!("Cancelling deployment {} of {}", deployment_guid, ctx.app_name);
    match ctx.control_plane.cancel_deployment(deployment_guid).await {
        Ok(((), w)) => ctx.record(w),
        Err(err) => log_cleanup_failure("cancel the deployment", &err),
    }
}
