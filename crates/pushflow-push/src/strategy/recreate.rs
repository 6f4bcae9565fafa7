//! Recreate strategy: stop everything, start the new version

use super::monitor::wait_until_running;
use super::{DeploymentContext, DeploymentExecutor};
use crate::error::Result;
use crate::event::PushEvent;
use async_trait::async_trait;
use pushflow_core::DeploymentStrategy;
use tracing::info;

/// Starts or restarts the app in place.
///
/// Used for `--strategy none` and for every app that is not running yet.
pub struct RecreateDeploymentExecutor;

impl RecreateDeploymentExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RecreateDeploymentExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeploymentExecutor for RecreateDeploymentExecutor {
    fn strategy(&self) -> DeploymentStrategy {
        DeploymentStrategy::None
    }

    async fn execute(&self, ctx: &DeploymentContext<'_>) -> Result<()> {
        ctx.emit(PushEvent::InstancesStarting).await;

        if let Some(droplet) = ctx.droplet {
            let ((), w) = ctx
                .control_plane
                .set_current_droplet(ctx.app_guid, droplet)
                .await?;
            ctx.record(w);
        }

        let ((), w) = if ctx.start {
            info!("Starting {}", ctx.app_name);
            ctx.control_plane.start_app(ctx.app_guid).await?
        } else {
            info!("Restarting {}", ctx.app_name);
            ctx.control_plane.restart_app(ctx.app_guid).await?
        };
        ctx.record(w);

        wait_until_running(ctx).await
    }
}
