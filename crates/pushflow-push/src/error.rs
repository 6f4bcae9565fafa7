//! Push error types

use pushflow_bits::BitsError;
use pushflow_cloud::CloudError;
use pushflow_core::ValidationError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Broad category of a [`PushError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad flags or manifest, caught before any remote call
    Validation,
    /// A domain, route or other referenced resource could not be resolved
    Resolution,
    /// The application itself failed: build failure, crash, flapping
    Staging,
    /// Something never finished in time
    Timeout,
    Cancelled,
    /// The platform rejected or failed a request
    Api,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Resolution => write!(f, "resolution"),
            ErrorKind::Staging => write!(f, "staging"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Api => write!(f, "api"),
        }
    }
}

/// Referenced remote resources that could not be matched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Domain for route '{route}' not found")]
    DomainNotFound { route: String },

    #[error("No default domain available in organization '{org}'")]
    NoDefaultDomain { org: String },

    #[error("Route '{route}' is already in use by another space")]
    RouteInOtherSpace { route: String },

    #[error(
        "Cannot scale {} of '{app}' while deployment {deployment} is in progress",
        .fields.join(", ")
    )]
    ScaleConflictsWithDeployment {
        app: String,
        deployment: String,
        fields: Vec<String>,
    },

    #[error("Route '{route}' has a port but '{domain}' is an HTTP domain")]
    InvalidHttpRoute { route: String, domain: String },

    #[error("Route '{route}' is on TCP domain '{domain}' and needs a port")]
    TcpRouteWithoutPort { route: String, domain: String },

    #[error("Service instance '{service}' for '{app}' not found")]
    ServiceInstanceNotFound { app: String, service: String },
}

/// Application-level failures; never retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StagingError {
    #[error("Staging of '{app}' failed: {reason}")]
    BuildFailed { app: String, reason: String },

    #[error("Package for '{app}' could not be processed: {reason}")]
    PackageFailed { app: String, reason: String },

    #[error("Droplet for '{app}' could not be processed: {reason}")]
    DropletFailed { app: String, reason: String },

    #[error("Instance {instance} of '{app}' crashed")]
    AppCrashed { app: String, instance: u32 },

    #[error("Instance {instance} of '{app}' keeps restarting")]
    Flapping { app: String, instance: u32 },

    #[error("Deployment of '{app}' failed: {reason}")]
    DeploymentFailed { app: String, reason: String },
}

/// Waits that ran out of time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("Timed out after {}s waiting for '{app}' to stage", .timeout.as_secs())]
    Staging { app: String, timeout: Duration },

    #[error("Timed out after {}s waiting for '{app}' to start", .timeout.as_secs())]
    Startup { app: String, timeout: Duration },

    #[error("Timed out after {}s waiting for the deployment of '{app}'", .timeout.as_secs())]
    Deployment { app: String, timeout: Duration },

    #[error("Command deadline exceeded")]
    CommandDeadline,
}

/// Errors from planning or actualizing a push
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PushError {
    #[error("Invalid push: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Resolution(#[from] ResolutionError),

    #[error("{0}")]
    Staging(#[from] StagingError),

    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    #[error("Push cancelled")]
    Cancelled,

    #[error("API error: {0}")]
    Api(#[from] CloudError),

    #[error("Upload failed after {attempts} attempts: {source}")]
    UploadFailed { attempts: u32, source: CloudError },

    #[error("Failed to archive application bits: {0}")]
    Bits(String),
}

impl From<BitsError> for PushError {
    fn from(err: BitsError) -> Self {
        PushError::Bits(err.to_string())
    }
}

impl PushError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PushError::Validation(_) | PushError::Bits(_) => ErrorKind::Validation,
            PushError::Resolution(_) => ErrorKind::Resolution,
            PushError::Staging(_) => ErrorKind::Staging,
            PushError::Timeout(_) => ErrorKind::Timeout,
            PushError::Cancelled => ErrorKind::Cancelled,
            PushError::Api(_) | PushError::UploadFailed { .. } => ErrorKind::Api,
        }
    }
}

pub type Result<T> = std::result::Result<T, PushError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        let err: PushError = ValidationError::MissingName.into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: PushError = TimeoutError::Staging {
            app: "web".into(),
            timeout: Duration::from_secs(900),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "Timed out after 900s waiting for 'web' to stage");

        let err: PushError = StagingError::BuildFailed {
            app: "web".into(),
            reason: "NoAppDetectedError".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Staging);

        assert_eq!(PushError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_scale_conflict_message() {
        let err = ResolutionError::ScaleConflictsWithDeployment {
            app: "web".into(),
            deployment: "dep-1".into(),
            fields: vec!["instances".into(), "memory".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cannot scale instances, memory of 'web' while deployment dep-1 is in progress"
        );

        let err: PushError = ResolutionError::ServiceInstanceNotFound {
            app: "web".into(),
            service: "db".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert_eq!(err.to_string(), "Service instance 'db' for 'web' not found");
    }
}
