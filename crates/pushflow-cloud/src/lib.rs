//! pushflow control plane abstraction
//!
//! The planner and the actualizer talk to the platform only through the
//! [`ControlPlane`] trait defined here.
//!
//! # Backends
//!
//! - **Cloud Controller** (`pushflow-cloud-cc`): v3 HTTP API
//! - **In-memory** ([`memory::InMemoryControlPlane`]): tests and `--dry-run`
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │        pushflow-push (planner/actualizer)│
//! └─────────────────┬────────────────────────┘
//!                   │ trait ControlPlane
//!        ┌──────────┴──────────┐
//! ┌──────▼───────┐     ┌───────▼──────┐
//! │ cloud-cc     │     │  in-memory   │
//! │ (reqwest)    │     │  (Mutex)     │
//! └──────────────┘     └──────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod provider;
pub mod resource;

// Re-exports
pub use error::{CloudError, Result};
pub use memory::{Behavior, BuildOutcome, InMemoryControlPlane, RecordedCall};
pub use provider::{ControlPlane, Reply};
pub use resource::{
    AppState, DeploymentKind, DeploymentState, DeploymentStatus, Domain, Droplet, DropletState,
    InstanceState, InstanceStats, JobKind, JobRef, JobStatus, Lifecycle, Package, PackageKind,
    PackageState, ProgressCallback, RemoteApp, Route, RouteQuery, RouterKind, ScaleRequest,
    ServiceInstance, Target,
};
