//! Instance health tracking across polls

use super::DeploymentContext;
use crate::error::{Result, StagingError, TimeoutError};
use pushflow_cloud::{InstanceState, InstanceStats};
use std::collections::HashMap;
use tokio::time::Instant;

/// Observed restarts of one instance that count as flapping
pub const FLAPPING_RESTARTS: u32 = 3;

/// Consecutive all-running polls needed before the app counts as up
const STABLE_POLLS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Starting,
    Running,
    Crashed { instance: u32 },
    Flapping { instance: u32 },
}

/// Folds successive instance snapshots into a [`Health`] verdict.
///
/// A restart is seen as an instance whose uptime went down between two
/// polls.
#[derive(Debug, Default)]
pub struct InstanceMonitor {
    uptimes: HashMap<u32, u64>,
    restarts: HashMap<u32, u32>,
    stable_polls: u32,
}

impl InstanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, stats: &[InstanceStats]) -> Health {
        if let Some(crashed) = stats.iter().find(|s| s.state == InstanceState::Crashed) {
            return Health::Crashed {
                instance: crashed.index,
            };
        }

        let mut restarted = false;
        for stat in stats {
            let previous = self.uptimes.insert(stat.index, stat.uptime_secs);
            if previous.is_some_and(|uptime| stat.uptime_secs < uptime) {
                restarted = true;
                let count = self.restarts.entry(stat.index).or_default();
                *count += 1;
                if *count >= FLAPPING_RESTARTS {
                    return Health::Flapping {
                        instance: stat.index,
                    };
                }
            }
        }

        let all_running =
            !stats.is_empty() && stats.iter().all(|s| s.state == InstanceState::Running);
        if all_running && !restarted {
            self.stable_polls += 1;
        } else {
            self.stable_polls = 0;
        }

        if self.stable_polls >= STABLE_POLLS {
            Health::Running
        } else {
            Health::Starting
        }
    }
}

/// Poll the web process once; crashes and flapping become errors.
pub(crate) async fn check_instances(
    ctx: &DeploymentContext<'_>,
    monitor: &mut InstanceMonitor,
) -> Result<Health> {
    let (stats, warnings) = ctx.control_plane.process_instances(ctx.app_guid).await?;
    ctx.record(warnings);

    match monitor.observe(&stats) {
        Health::Crashed { instance } => Err(StagingError::AppCrashed {
            app: ctx.app_name.to_string(),
            instance,
        }
        .into()),
        Health::Flapping { instance } => Err(StagingError::Flapping {
            app: ctx.app_name.to_string(),
            instance,
        }
        .into()),
        health => Ok(health),
    }
}

/// Wait until every instance runs, bounded by the startup timeout.
pub(crate) async fn wait_until_running(ctx: &DeploymentContext<'_>) -> Result<()> {
    let timeout = ctx.config.startup_timeout;
    let deadline = Instant::now() + timeout;
    let mut monitor = InstanceMonitor::new();

    loop {
        if check_instances(ctx, &mut monitor).await? == Health::Running {
            tracing::debug!("All instances of {} are running", ctx.app_name);
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(TimeoutError::Startup {
                app: ctx.app_name.to_string(),
                timeout,
            }
            .into());
        }
        ctx.pause().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(index: u32, state: InstanceState, uptime_secs: u64) -> InstanceStats {
        InstanceStats {
            index,
            state,
            uptime_secs,
        }
    }

    #[test]
    fn test_running_after_two_stable_polls() {
        let mut monitor = InstanceMonitor::new();
        assert_eq!(
            monitor.observe(&[stat(0, InstanceState::Starting, 0)]),
            Health::Starting
        );
        assert_eq!(
            monitor.observe(&[stat(0, InstanceState::Running, 5)]),
            Health::Starting
        );
        assert_eq!(
            monitor.observe(&[stat(0, InstanceState::Running, 10)]),
            Health::Running
        );
    }

    #[test]
    fn test_no_instances_is_starting() {
        let mut monitor = InstanceMonitor::new();
        assert_eq!(monitor.observe(&[]), Health::Starting);
        assert_eq!(monitor.observe(&[]), Health::Starting);
    }

    #[test]
    fn test_crash() {
        let mut monitor = InstanceMonitor::new();
        let stats = [
            stat(0, InstanceState::Running, 30),
            stat(1, InstanceState::Crashed, 0),
        ];
        assert_eq!(monitor.observe(&stats), Health::Crashed { instance: 1 });
    }

    #[test]
    fn test_flapping_after_three_restarts() {
        let mut monitor = InstanceMonitor::new();
        let verdicts: Vec<Health> = [50, 40, 30, 20]
            .into_iter()
            .map(|uptime| monitor.observe(&[stat(0, InstanceState::Running, uptime)]))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                Health::Starting,
                Health::Starting,
                Health::Starting,
                Health::Flapping { instance: 0 }
            ]
        );
    }
}
