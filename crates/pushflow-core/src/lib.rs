//! pushflow core
//!
//! Manifest model, command-line overrides and the rules that merge the
//! two. Nothing in this crate talks to the network or the filesystem.
//!
//! ```text
//! manifest.yml ──► Manifest ─┐
//!                            ├─► merge() ──► Manifest (one entry per app to push)
//! CLI flags ──► FlagOverrides┘
//! ```

pub mod error;
pub mod interpolate;
pub mod merge;
pub mod model;
pub mod route;
pub mod warnings;

// Re-exports
pub use error::{Result, ValidationError};
pub use interpolate::interpolate;
pub use merge::{merge, validate_application, validate_flag_combinations, validate_scale_overrides};
pub use model::*;
pub use route::{RouteSpec, random_route_host, sanitize_hostname};
pub use warnings::Warnings;
