//! Change set computed by the planner

use pushflow_cloud::ScaleRequest;
use pushflow_core::HealthCheckType;
use std::fmt;

/// A single difference between the desired and the remote application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    CreateApp,
    Lifecycle {
        buildpacks: Vec<String>,
        stack: Option<String>,
    },
    /// Environment variables whose value is new or different
    Env { keys: Vec<String> },
    Scale(ScaleRequest),
    HealthCheck {
        kind: Option<HealthCheckType>,
        endpoint: Option<String>,
        timeout: Option<u32>,
    },
    Command { command: String },
    BindService { name: String, guid: String },
    UploadBits { sha256: String, size: u64 },
    /// Prebuilt droplet replacing staging
    UploadDroplet { sha256: String, size: u64 },
    DockerPackage { image: String },
    Stage,
    MapRoute { route: String, create: bool },
    UnmapRoute { route: String },
    Start,
    Restart,
}

/// Coarse grouping used for summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCategory {
    Create,
    Update,
    Package,
    Route,
    Start,
}

impl Change {
    pub fn category(&self) -> ChangeCategory {
        match self {
            Change::CreateApp => ChangeCategory::Create,
            Change::Lifecycle { .. }
            | Change::Env { .. }
            | Change::Scale(_)
            | Change::HealthCheck { .. }
            | Change::Command { .. }
            | Change::BindService { .. } => ChangeCategory::Update,
            Change::UploadBits { .. }
            | Change::UploadDroplet { .. }
            | Change::DockerPackage { .. }
            | Change::Stage => ChangeCategory::Package,
            Change::MapRoute { .. } | Change::UnmapRoute { .. } => ChangeCategory::Route,
            Change::Start | Change::Restart => ChangeCategory::Start,
        }
    }

    /// Settings that only take effect after a restart. Instance count
    /// alone is applied live.
    pub fn requires_restart(&self) -> bool {
        match self {
            Change::Scale(scale) => scale.memory_mb.is_some() || scale.disk_mb.is_some(),
            Change::Lifecycle { .. }
            | Change::Env { .. }
            | Change::HealthCheck { .. }
            | Change::Command { .. }
            | Change::BindService { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::CreateApp => write!(f, "create app"),
            Change::Lifecycle { buildpacks, stack } => {
                write!(f, "set buildpacks [{}]", buildpacks.join(", "))?;
                if let Some(stack) = stack {
                    write!(f, " on stack {}", stack)?;
                }
                Ok(())
            }
            Change::Env { keys } => write!(f, "set env {}", keys.join(", ")),
            Change::Scale(scale) => {
                let mut parts = Vec::new();
                if let Some(n) = scale.instances {
                    parts.push(format!("instances={}", n));
                }
                if let Some(m) = scale.memory_mb {
                    parts.push(format!("memory={}M", m));
                }
                if let Some(d) = scale.disk_mb {
                    parts.push(format!("disk={}M", d));
                }
                write!(f, "scale {}", parts.join(" "))
            }
            Change::HealthCheck { kind, endpoint, .. } => {
                write!(f, "health check")?;
                if let Some(kind) = kind {
                    write!(f, " {}", kind)?;
                }
                if let Some(endpoint) = endpoint {
                    write!(f, " {}", endpoint)?;
                }
                Ok(())
            }
            Change::Command { command } => write!(f, "command '{}'", command),
            Change::BindService { name, .. } => write!(f, "bind service {}", name),
            Change::UploadBits { sha256, size } => {
                write!(f, "upload bits ({} bytes, sha256 {:.12})", size, sha256)
            }
            Change::UploadDroplet { sha256, size } => {
                write!(f, "upload droplet ({} bytes, sha256 {:.12})", size, sha256)
            }
            Change::DockerPackage { image } => write!(f, "docker image {}", image),
            Change::Stage => write!(f, "stage"),
            Change::MapRoute { route, create: true } => write!(f, "create and map route {}", route),
            Change::MapRoute { route, create: false } => write!(f, "map route {}", route),
            Change::UnmapRoute { route } => write!(f, "unmap route {}", route),
            Change::Start => write!(f, "start"),
            Change::Restart => write!(f, "restart"),
        }
    }
}

/// Ordered, duplicate-free list of [`Change`]s
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, change: Change) {
        if !self.changes.contains(&change) {
            self.changes.push(change);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn any(&self, predicate: impl Fn(&Change) -> bool) -> bool {
        self.changes.iter().any(predicate)
    }

    pub fn scale(&self) -> Option<&ScaleRequest> {
        self.changes.iter().find_map(|c| match c {
            Change::Scale(scale) => Some(scale),
            _ => None,
        })
    }

    pub fn summary(&self) -> ChangeSummary {
        let count = |category| {
            self.changes
                .iter()
                .filter(|c| c.category() == category)
                .count()
        };
        ChangeSummary {
            create: count(ChangeCategory::Create),
            update: count(ChangeCategory::Update),
            package: count(ChangeCategory::Package),
            route: count(ChangeCategory::Route),
            start: count(ChangeCategory::Start),
        }
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Counts per [`ChangeCategory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSummary {
    pub create: usize,
    pub update: usize,
    pub package: usize,
    pub route: usize,
    pub start: usize,
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.create + self.update + self.package + self.route + self.start == 0 {
            return write!(f, "no changes");
        }
        write!(
            f,
            "{} to create, {} to update, {} package steps, {} route changes, {} to start",
            self.create, self.update, self.package, self.route, self.start
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_deduplicates() {
        let mut changes = ChangeSet::new();
        changes.push(Change::Stage);
        changes.push(Change::Stage);
        changes.push(Change::Start);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_summary() {
        let mut changes = ChangeSet::new();
        changes.push(Change::CreateApp);
        changes.push(Change::UploadBits {
            sha256: "ab".repeat(32),
            size: 10,
        });
        changes.push(Change::Stage);
        changes.push(Change::MapRoute {
            route: "web.example.com".into(),
            create: true,
        });
        changes.push(Change::Start);

        let summary = changes.summary();
        assert_eq!(summary.create, 1);
        assert_eq!(summary.package, 2);
        assert_eq!(
            summary.to_string(),
            "1 to create, 0 to update, 2 package steps, 1 route changes, 1 to start"
        );
        assert_eq!(ChangeSet::new().summary().to_string(), "no changes");
    }

    #[test]
    fn test_display() {
        let scale = Change::Scale(ScaleRequest {
            instances: Some(3),
            memory_mb: Some(512),
            disk_mb: None,
        });
        assert_eq!(scale.to_string(), "scale instances=3 memory=512M");
        assert!(Change::Env { keys: vec![] }.requires_restart());
        assert_eq!(
            Change::UnmapRoute {
                route: "old.example.com".into()
            }
            .to_string(),
            "unmap route old.example.com"
        );
    }

    #[test]
    fn test_scale_restart_rule() {
        let memory = Change::Scale(ScaleRequest {
            instances: Some(3),
            memory_mb: Some(512),
            disk_mb: None,
        });
        let disk = Change::Scale(ScaleRequest {
            instances: None,
            memory_mb: None,
            disk_mb: Some(2048),
        });
        let instances_only = Change::Scale(ScaleRequest {
            instances: Some(5),
            memory_mb: None,
            disk_mb: None,
        });
        assert!(memory.requires_restart());
        assert!(disk.requires_restart());
        assert!(!instances_only.requires_restart());
    }
}
