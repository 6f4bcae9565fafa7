//! Canary strategy: one new instance, then wait for promotion

use super::monitor::wait_until_running;
use super::rolling::{cancel, follow_deployment};
use super::{DeploymentContext, DeploymentExecutor};
use crate::error::Result;
use crate::event::PushEvent;
use async_trait::async_trait;
use pushflow_cloud::{DeploymentKind, DeploymentState};
use pushflow_core::DeploymentStrategy;
use tracing::info;

/// Holds a canary deployment at its first instance.
///
/// Succeeds once the canary is healthy; promoting it is left to the user.
pub struct CanaryDeploymentExecutor;

impl CanaryDeploymentExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CanaryDeploymentExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeploymentExecutor for CanaryDeploymentExecutor {
    fn strategy(&self) -> DeploymentStrategy {
        DeploymentStrategy::Canary
    }

    async fn execute(&self, ctx: &DeploymentContext<'_>) -> Result<()> {
        let status = follow_deployment(ctx, DeploymentKind::Canary).await?;
        if status.state != DeploymentState::Paused {
            // nothing left to promote
            return Ok(());
        }

        if let Err(err) = wait_until_running(ctx).await {
            cancel(ctx, &status.guid).await;
            return Err(err);
        }

        info!(
            "Canary of {} is healthy, deployment {} awaits promotion",
            ctx.app_name, status.guid
        );
        ctx.emit(PushEvent::AwaitingPromotion {
            deployment: status.guid,
        })
        .await;
        Ok(())
    }
}
