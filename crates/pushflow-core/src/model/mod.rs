//! Model definitions
//!
//! Data types shared by the merger, the planner and the CLI. Each model
//! lives in its own module.

mod application;
mod manifest;
mod overrides;
mod size;

// Re-exports
pub use application::*;
pub use manifest::*;
pub use overrides::*;
pub use size::*;
