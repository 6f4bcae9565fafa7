//! Manifest definition

use super::application::Application;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered list of applications to push.
///
/// Order is significant: plans are built and actualized in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub applications: Vec<Application>,
}

impl Manifest {
    pub fn new(applications: Vec<Application>) -> Self {
        Self { applications }
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn app(&self, name: &str) -> Option<&Application> {
        self.applications.iter().find(|a| a.name == name)
    }

    pub fn app_names(&self) -> Vec<&str> {
        self.applications.iter().map(|a| a.name.as_str()).collect()
    }

    /// First name that appears more than once, if any.
    pub fn first_duplicate_name(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.applications
            .iter()
            .map(|a| a.name.as_str())
            .find(|name| !seen.insert(*name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_manifest_yaml() {
        let yaml = r#"
applications:
- name: web
  memory: 512M
  disk_quota: 1G
  instances: 2
  buildpacks: [ruby_buildpack]
  routes:
  - route: web.example.com
  health-check-type: http
  env:
    RACK_ENV: production
  services:
  - web-db
- name: worker
  no-route: true
  docker:
    image: acme/worker:1.2
    username: deployer
"#;
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.app_names(), vec!["web", "worker"]);

        let web = manifest.app("web").unwrap();
        assert_eq!(web.memory.unwrap().get(), 512);
        assert_eq!(web.disk_quota.unwrap().get(), 1024);
        assert_eq!(web.instances, Some(2));
        assert_eq!(web.services, vec!["web-db"]);
        assert_eq!(web.route_strings().collect::<Vec<_>>(), vec!["web.example.com"]);
        assert_eq!(web.env.get("RACK_ENV").map(String::as_str), Some("production"));

        let worker = manifest.app("worker").unwrap();
        assert!(worker.no_route);
        let docker = worker.docker.as_ref().unwrap();
        assert_eq!(docker.image, "acme/worker:1.2");
        assert_eq!(docker.username.as_deref(), Some("deployer"));
        assert!(docker.password.is_none());
    }

    #[test]
    fn test_first_duplicate_name() {
        let manifest = Manifest::new(vec![
            Application::named("a"),
            Application::named("b"),
            Application::named("a"),
        ]);
        assert_eq!(manifest.first_duplicate_name(), Some("a"));
        assert_eq!(Manifest::default().first_duplicate_name(), None);
    }
}
