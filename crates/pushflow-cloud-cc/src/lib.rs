//! Cloud Controller v3 backend for pushflow
//!
//! Implements [`pushflow_cloud::ControlPlane`] over HTTP. Platform warnings
//! sent in the `X-Cf-Warnings` header are returned alongside every result.

mod api;
mod client;
mod provider;

pub use client::CcConfig;
pub use provider::CloudControllerClient;
