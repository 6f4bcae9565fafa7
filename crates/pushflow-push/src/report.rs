//! Sequential driver over a whole plan batch

use crate::actualizer::Actualizer;
use crate::cancel::CancelSignal;
use crate::error::PushError;
use crate::event::PushEvent;
use crate::plan::PlanBatch;
use crate::sink::{ProgressSink, WarningsCollector};
use pushflow_core::Warnings;
use std::sync::Arc;

/// Final result of one application
#[derive(Debug, Clone, PartialEq)]
pub struct AppOutcome {
    pub position: usize,
    pub app_name: String,
    pub result: Result<(), PushError>,
}

impl AppOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-application results of a push, in manifest order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    pub outcomes: Vec<AppOutcome>,
    pub warnings: Warnings,
}

impl PushReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(AppOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &AppOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Process exit code: non-zero if any application failed
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// Actualize every plan of `batch`, one after the other.
///
/// Each plan's stream is drained before the next one starts. Applications
/// that could not be planned are reported as failed without being touched.
pub async fn push_all(
    actualizer: &Actualizer,
    batch: PlanBatch,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelSignal,
) -> PushReport {
    let warnings = WarningsCollector::new();
    warnings.extend(batch.warnings);

    let mut outcomes: Vec<AppOutcome> = batch
        .failures
        .into_iter()
        .map(|failure| AppOutcome {
            position: failure.position,
            app_name: failure.app_name,
            result: Err(failure.error),
        })
        .collect();

    for plan in batch.plans {
        let position = plan.position();
        let app_name = plan.app_name().to_string();
        tracing::info!("Pushing {} ({})", app_name, plan.changes().summary());
        sink.on_plan_start(&app_name);

        let mut events =
            actualizer.actualize(plan, Arc::clone(&sink), warnings.clone(), cancel.clone());
        let mut result = Err(PushError::Cancelled);
        while let Some(event) = events.next().await {
            match event {
                PushEvent::Complete => result = Ok(()),
                PushEvent::Error { cause } => result = Err(cause),
                _ => {}
            }
        }

        outcomes.push(AppOutcome {
            position,
            app_name,
            result,
        });
    }

    outcomes.sort_by_key(|o| o.position);
    PushReport {
        outcomes,
        warnings: warnings.snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TimeoutError;

    #[test]
    fn test_exit_code() {
        let mut report = PushReport {
            outcomes: vec![AppOutcome {
                position: 0,
                app_name: "web".into(),
                result: Ok(()),
            }],
            warnings: Warnings::new(),
        };
        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);

        report.outcomes.push(AppOutcome {
            position: 1,
            app_name: "worker".into(),
            result: Err(TimeoutError::CommandDeadline.into()),
        });
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failures().count(), 1);
    }
}
