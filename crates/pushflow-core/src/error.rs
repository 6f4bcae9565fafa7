use thiserror::Error;

/// Errors raised before any remote call is made.
///
/// Every variant is cheap to construct and carries enough context to be
/// shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Incorrect usage: the following arguments cannot be used together: {}", .flags.join(", "))]
    ConflictingFlags { flags: Vec<String> },

    #[error("Incorrect usage: '{flag}' must be provided when using '{required_by}'")]
    RequiredFlag { flag: String, required_by: String },

    #[error("Instances must be greater than or equal to 0 (got {value})")]
    InstancesOutOfRange { value: i64 },

    #[error("{field} must be greater than 0")]
    ZeroSize { field: String },

    #[error("Invalid size '{value}': use a number followed by M or G (e.g. 256M, 1G)")]
    InvalidSize { value: String },

    #[error(
        "Cannot change {} while deployment {deployment} is in progress; wait for it to finish or cancel it",
        .fields.join("/")
    )]
    ScaleConflictsWithDeployment {
        deployment: String,
        fields: Vec<String>,
    },

    #[error(
        "Incorrect usage: the following flags cannot be used with a manifest containing multiple apps: {}",
        .flags.join(", ")
    )]
    FlagsWithMultipleApps { flags: Vec<String> },

    #[error("Could not find app named '{name}' in manifest")]
    AppNotFoundInManifest { name: String },

    #[error("Incorrect usage: the push command requires an app name, either in the manifest or on the command line")]
    MissingName,

    #[error("Application name '{name}' appears more than once in the manifest")]
    DuplicateAppName { name: String },

    #[error("Application '{app}' cannot use the combination of properties: {}", .properties.join(", "))]
    PropertyCombination { app: String, properties: Vec<String> },

    #[error("Application '{app}': multiple buildpacks cannot include 'default' or 'null'")]
    InvalidBuildpacks { app: String },

    #[error("Application '{app}': health check type must be 'http' to set a health check HTTP endpoint")]
    HttpHealthCheckInvalid { app: String },

    #[error("The route '{route}' is not a properly formed URL")]
    InvalidRoute { route: String },

    #[error("Application '{app}': docker password must be set with CF_DOCKER_PASSWORD when a docker username is given")]
    DockerPasswordNotSet { app: String },

    #[error("Expected to find variable '{name}' for manifest interpolation")]
    UndefinedVariable { name: String },

    #[error("Invalid interpolation pattern: {0}")]
    Pattern(String),

    #[error("Unknown {kind} '{value}'")]
    UnknownValue { kind: String, value: String },
}

pub type Result<T> = std::result::Result<T, ValidationError>;
