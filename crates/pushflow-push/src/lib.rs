//! pushflow push engine
//!
//! Plans and actualizes pushes: a merged manifest becomes one
//! [`PushPlan`] per application, and each plan is executed by the
//! [`Actualizer`] as a stream of [`PushEvent`]s.
//!
//! ```text
//! Manifest + FlagOverrides
//!         │ merge
//!         ▼
//!   PlanBuilder ──► PushPlan × N (manifest order)
//!         │
//!         ▼
//!   Actualizer ──► EventStream ──► ProgressSink
//!         │
//!         └─ Deploying ──► DeploymentExecutor (none / rolling / canary)
//! ```

pub mod actualizer;
pub mod cancel;
pub mod change;
pub mod error;
pub mod event;
pub mod plan;
pub mod planner;
pub mod report;
pub mod routes;
pub mod sink;
pub mod strategy;

// Re-exports
pub use actualizer::{ActualizeConfig, Actualizer};
pub use cancel::{CancelHandle, CancelSignal};
pub use change::{Change, ChangeCategory, ChangeSet, ChangeSummary};
pub use error::{
    ErrorKind, PushError, ResolutionError, Result, StagingError, TimeoutError,
};
pub use event::{EventStream, PushEvent};
pub use plan::{PlanBatch, PlanFailure, PushPlan, RouteBinding};
pub use planner::{PlanBuilder, create_push_plans};
pub use report::{AppOutcome, PushReport, push_all};
pub use routes::{RandomWords, RouteWords};
pub use sink::{NullSink, ProgressSink, WarningsCollector};
pub use strategy::{DeploymentExecutor, create_executor};
