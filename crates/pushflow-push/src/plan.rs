//! Push plans
//!
//! A [`PushPlan`] is built once by the planner and handed by value to the
//! actualizer. It has no mutating API.

use crate::change::{Change, ChangeSet};
use crate::error::PushError;
use pushflow_bits::BitsArchive;
use pushflow_cloud::{Route, RouteQuery, ServiceInstance, Target};
use pushflow_core::{Application, DeploymentStrategy, Warnings};

/// A route the application should end up mapped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub query: RouteQuery,
    /// Guid of the route when it already exists
    pub route_guid: Option<String>,
    /// Already mapped to this application
    pub mapped: bool,
}

impl RouteBinding {
    pub fn url(&self) -> String {
        self.query.url()
    }
}

/// Execution plan for one application
#[derive(Debug)]
pub struct PushPlan {
    position: usize,
    app: Application,
    target: Target,
    app_guid: Option<String>,
    routes: Vec<RouteBinding>,
    unmap_routes: Vec<Route>,
    services: Vec<ServiceInstance>,
    changes: ChangeSet,
    strategy: DeploymentStrategy,
    no_start: bool,
    bits: Option<BitsArchive>,
    droplet: Option<BitsArchive>,
    needs_package_upload: bool,
    needs_droplet_upload: bool,
    needs_restage: bool,
    needs_route_changes: bool,
    needs_route_unmapping: bool,
    needs_service_bindings: bool,
    needs_restart: bool,
}

pub(crate) struct PlanParts {
    pub position: usize,
    pub app: Application,
    pub target: Target,
    pub app_guid: Option<String>,
    pub routes: Vec<RouteBinding>,
    pub unmap_routes: Vec<Route>,
    pub services: Vec<ServiceInstance>,
    pub changes: ChangeSet,
    pub strategy: DeploymentStrategy,
    pub no_start: bool,
    pub bits: Option<BitsArchive>,
    pub droplet: Option<BitsArchive>,
}

impl PushPlan {
    pub(crate) fn new(parts: PlanParts) -> Self {
        let changes = parts.changes;
        let needs_package_upload =
            changes.any(|c| matches!(c, Change::UploadBits { .. } | Change::DockerPackage { .. }));
        let needs_droplet_upload = changes.any(|c| matches!(c, Change::UploadDroplet { .. }));
        let needs_restage = changes.any(|c| matches!(c, Change::Stage));
        let needs_route_changes = changes.any(|c| matches!(c, Change::MapRoute { .. }));
        let needs_route_unmapping = changes.any(|c| matches!(c, Change::UnmapRoute { .. }));
        let needs_service_bindings = changes.any(|c| matches!(c, Change::BindService { .. }));
        let needs_restart = changes.any(|c| matches!(c, Change::Start | Change::Restart));

        Self {
            position: parts.position,
            app: parts.app,
            target: parts.target,
            app_guid: parts.app_guid,
            routes: parts.routes,
            unmap_routes: parts.unmap_routes,
            services: parts.services,
            changes,
            strategy: parts.strategy,
            no_start: parts.no_start,
            bits: parts.bits,
            droplet: parts.droplet,
            needs_package_upload,
            needs_droplet_upload,
            needs_restage,
            needs_route_changes,
            needs_route_unmapping,
            needs_service_bindings,
            needs_restart,
        }
    }

    /// Index of the application in the merged manifest
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn app_name(&self) -> &str {
        &self.app.name
    }

    /// Fully merged application
    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Guid of the existing remote app; `None` for a create plan
    pub fn app_guid(&self) -> Option<&str> {
        self.app_guid.as_deref()
    }

    pub fn is_create(&self) -> bool {
        self.app_guid.is_none()
    }

    pub fn routes(&self) -> &[RouteBinding] {
        &self.routes
    }

    /// Mapped routes to remove from the app
    pub fn unmap_routes(&self) -> &[Route] {
        &self.unmap_routes
    }

    /// Service instances to bind, not yet bound to the app
    pub fn services(&self) -> &[ServiceInstance] {
        &self.services
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Strategy requested on the command line
    pub fn strategy(&self) -> DeploymentStrategy {
        self.strategy
    }

    /// Strategy actually used: applications that are not running yet are
    /// simply started.
    pub fn effective_strategy(&self) -> DeploymentStrategy {
        if self.is_create() || self.changes.any(|c| matches!(c, Change::Start)) {
            DeploymentStrategy::None
        } else {
            self.strategy
        }
    }

    pub fn no_start(&self) -> bool {
        self.no_start
    }

    /// Archive to upload, present when bits changed
    pub fn bits(&self) -> Option<&BitsArchive> {
        self.bits.as_ref()
    }

    /// Prebuilt droplet to upload instead of bits
    pub fn droplet(&self) -> Option<&BitsArchive> {
        self.droplet.as_ref()
    }

    pub fn needs_package_upload(&self) -> bool {
        self.needs_package_upload
    }

    pub fn needs_droplet_upload(&self) -> bool {
        self.needs_droplet_upload
    }

    pub fn needs_restage(&self) -> bool {
        self.needs_restage
    }

    pub fn needs_route_changes(&self) -> bool {
        self.needs_route_changes
    }

    pub fn needs_route_unmapping(&self) -> bool {
        self.needs_route_unmapping
    }

    pub fn needs_service_bindings(&self) -> bool {
        self.needs_service_bindings
    }

    pub fn needs_restart(&self) -> bool {
        self.needs_restart
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Planning failure for one application
#[derive(Debug, Clone, PartialEq)]
pub struct PlanFailure {
    pub position: usize,
    pub app_name: String,
    pub error: PushError,
}

/// Result of planning every application of a manifest
#[derive(Debug, Default)]
pub struct PlanBatch {
    /// Successful plans, in manifest order
    pub plans: Vec<PushPlan>,
    pub warnings: Warnings,
    pub failures: Vec<PlanFailure>,
}

impl PlanBatch {
    /// Error of the first application (in manifest order) that could not be
    /// planned
    pub fn first_error(&self) -> Option<&PushError> {
        self.failures
            .iter()
            .min_by_key(|f| f.position)
            .map(|f| &f.error)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushflow_core::ValidationError;

    fn plan_with(changes: Vec<Change>, app_guid: Option<&str>) -> PushPlan {
        let mut set = ChangeSet::new();
        for change in changes {
            set.push(change);
        }
        PushPlan::new(PlanParts {
            position: 0,
            app: Application::named("web"),
            target: Target::new("org-1", "org", "space-1", "dev"),
            app_guid: app_guid.map(str::to_string),
            routes: Vec::new(),
            unmap_routes: Vec::new(),
            services: Vec::new(),
            changes: set,
            strategy: DeploymentStrategy::Rolling,
            no_start: false,
            bits: None,
            droplet: None,
        })
    }

    #[test]
    fn test_derived_flags() {
        let plan = plan_with(
            vec![
                Change::CreateApp,
                Change::DockerPackage {
                    image: "nginx".into(),
                },
                Change::Stage,
                Change::Start,
            ],
            None,
        );
        assert!(plan.is_create());
        assert!(plan.needs_package_upload());
        assert!(plan.needs_restage());
        assert!(plan.needs_restart());
        assert!(!plan.needs_route_changes());
        assert_eq!(plan.effective_strategy(), DeploymentStrategy::None);

        assert!(!plan.needs_droplet_upload());

        let plan = plan_with(
            vec![
                Change::UploadDroplet {
                    sha256: "ab".repeat(32),
                    size: 3,
                },
                Change::UnmapRoute {
                    route: "web.example.com".into(),
                },
                Change::Restart,
            ],
            Some("app-1"),
        );
        assert!(plan.needs_droplet_upload());
        assert!(!plan.needs_package_upload());
        assert!(!plan.needs_restage());
        assert!(plan.needs_route_unmapping());
        assert!(!plan.needs_route_changes());

        let plan = plan_with(vec![], Some("app-1"));
        assert!(!plan.has_changes());
        assert_eq!(plan.effective_strategy(), DeploymentStrategy::Rolling);
    }

    #[test]
    fn test_first_error_in_manifest_order() {
        let batch = PlanBatch {
            plans: Vec::new(),
            warnings: Warnings::new(),
            failures: vec![
                PlanFailure {
                    position: 2,
                    app_name: "c".into(),
                    error: PushError::Cancelled,
                },
                PlanFailure {
                    position: 0,
                    app_name: "a".into(),
                    error: ValidationError::MissingName.into(),
                },
            ],
        };
        assert_eq!(
            batch.first_error(),
            Some(&PushError::Validation(ValidationError::MissingName))
        );
    }
}
