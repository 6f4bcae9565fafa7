//! Progress sink and the shared warnings collector

use crate::event::PushEvent;
use pushflow_core::Warnings;
use std::sync::{Arc, Mutex, PoisonError};

/// Renders push progress. Called from the actualizer task; must not block.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &PushEvent);

    /// Byte-level upload progress
    fn on_bytes_transferred(&self, _sent: u64, _total: u64) {}

    /// A new plan is about to be actualized by the driver
    fn on_plan_start(&self, _app_name: &str) {}
}

/// Sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_event(&self, _event: &PushEvent) {}
}

/// Append-only warnings shared by every plan of a push
#[derive(Debug, Clone, Default)]
pub struct WarningsCollector {
    inner: Arc<Mutex<Warnings>>,
}

impl WarningsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, warning: impl Into<String>) {
        self.lock().push(warning);
    }

    pub fn extend(&self, warnings: Warnings) {
        if !warnings.is_empty() {
            for warning in warnings.iter() {
                tracing::warn!("{}", warning);
            }
            self.lock().extend(warnings);
        }
    }

    /// Copy of everything collected so far
    pub fn snapshot(&self) -> Warnings {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Warnings> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
