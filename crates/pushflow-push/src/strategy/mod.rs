//! Deployment strategies
//!
//! The `Deploying` phase of the actualizer hands over to one of these
//! executors. Each one is its own small state machine over the control
//! plane; adding a strategy does not touch the actualizer.

pub mod canary;
pub mod monitor;
pub mod recreate;
pub mod rolling;

pub use canary::CanaryDeploymentExecutor;
pub use monitor::{Health, InstanceMonitor};
pub use recreate::RecreateDeploymentExecutor;
pub use rolling::RollingDeploymentExecutor;

use crate::actualizer::{ActualizeConfig, Emitter};
use crate::error::Result;
use crate::event::PushEvent;
use crate::sink::WarningsCollector;
use async_trait::async_trait;
use pushflow_cloud::ControlPlane;
use pushflow_core::{DeploymentStrategy, Warnings};

/// Everything an executor needs to roll out one application
pub struct DeploymentContext<'a> {
    pub control_plane: &'a dyn ControlPlane,
    pub app_name: &'a str,
    pub app_guid: &'a str,
    /// Freshly staged droplet, if any
    pub droplet: Option<&'a str>,
    /// The app is not running yet and has to be started, not restarted
    pub start: bool,
    pub config: &'a ActualizeConfig,
    pub(crate) emitter: &'a Emitter,
    pub(crate) warnings: &'a WarningsCollector,
}

impl DeploymentContext<'_> {
    pub async fn emit(&self, event: PushEvent) {
        self.emitter.emit(event).await;
    }

    pub fn record(&self, warnings: Warnings) {
        self.warnings.extend(warnings);
    }

    /// Wait one poll interval.
    pub async fn pause(&self) {
        tokio::time::sleep(self.config.poll_interval).await;
    }
}

/// Rolls a staged application out
#[async_trait]
pub trait DeploymentExecutor: Send + Sync {
    fn strategy(&self) -> DeploymentStrategy;

    async fn execute(&self, ctx: &DeploymentContext<'_>) -> Result<()>;
}

/// Factory for deployment executors
pub fn create_executor(strategy: DeploymentStrategy) -> Box<dyn DeploymentExecutor> {
    match strategy {
        DeploymentStrategy::None => Box::new(RecreateDeploymentExecutor::new()),
        DeploymentStrategy::Rolling => Box::new(RollingDeploymentExecutor::new()),
        DeploymentStrategy::Canary => Box::new(CanaryDeploymentExecutor::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_executor() {
        for strategy in [
            DeploymentStrategy::None,
            DeploymentStrategy::Rolling,
            DeploymentStrategy::Canary,
        ] {
            assert_eq!(create_executor(strategy).strategy(), strategy);
        }
    }
}
