//! Manifest reader

use anyhow::Context;
use pushflow_core::{FlagOverrides, Manifest, interpolate};
use std::collections::HashMap;
use std::path::Path;

/// Read a manifest, substituting `((var))` placeholders from `vars`.
///
/// Relative application paths are resolved against the manifest's
/// directory.
pub fn read_manifest(path: &Path, vars: &HashMap<String, String>) -> anyhow::Result<Manifest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let text = interpolate(&raw, vars)?;
    let mut manifest: Manifest = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse manifest {}", path.display()))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    for app in &mut manifest.applications {
        if let Some(app_path) = &app.path {
            if app_path.is_relative() {
                app.path = Some(dir.join(app_path));
            }
        }
    }

    tracing::debug!(
        "Read {} applications from {}",
        manifest.applications.len(),
        path.display()
    );
    Ok(manifest)
}

/// Apps without a path push the manifest's directory, unless the command
/// line supplies a path or a docker image.
pub fn default_app_paths(manifest: &mut Manifest, manifest_path: &Path, overrides: &FlagOverrides) {
    if overrides.path.is_some()
        || overrides.docker_image.is_some()
        || overrides.droplet_path.is_some()
    {
        return;
    }
    let dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    for app in &mut manifest.applications {
        if app.path.is_none() && !app.is_docker() {
            app.path = Some(dir.to_path_buf());
        }
    }
}

/// Read a YAML mapping of variables; scalars are turned into strings.
pub fn read_vars_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read vars file {}", path.display()))?;
    let values: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse vars file {}", path.display()))?;

    values
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => anyhow::bail!("Variable '{}' in {} is not a scalar", name, path.display()),
            };
            Ok((name, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_read_manifest_with_vars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.yml");
        fs::write(
            &path,
            r#"
applications:
- name: web
  path: ./app
  memory: ((memory))
  instances: 2
  routes:
  - route: web.((domain))
  env:
    MODE: ((mode))
"#,
        )
        .unwrap();

        let vars = HashMap::from([
            ("memory".to_string(), "512M".to_string()),
            ("domain".to_string(), "example.com".to_string()),
            ("mode".to_string(), "production".to_string()),
        ]);
        let manifest = read_manifest(&path, &vars).unwrap();
        let app = &manifest.applications[0];
        assert_eq!(app.name, "web");
        assert_eq!(app.path.as_deref(), Some(dir.path().join("./app").as_path()));
        assert_eq!(app.memory.map(|m| m.get()), Some(512));
        assert_eq!(app.routes[0].route, "web.example.com");
        assert_eq!(app.env["MODE"], "production");
    }

    #[test]
    fn test_missing_variable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.yml");
        fs::write(&path, "applications:\n- name: ((name))\n").unwrap();

        let err = read_manifest(&path, &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("name"), "{}", err);
    }

    #[test]
    fn test_default_app_paths() {
        let mut manifest = Manifest::new(vec![
            pushflow_core::Application::named("web"),
            pushflow_core::Application {
                path: Some(PathBuf::from("/srv/api")),
                ..pushflow_core::Application::named("api")
            },
        ]);
        let manifest_path = Path::new("/work/manifest.yml");
        default_app_paths(&mut manifest, manifest_path, &FlagOverrides::default());
        assert_eq!(
            manifest.applications[0].path.as_deref(),
            Some(Path::new("/work"))
        );
        assert_eq!(
            manifest.applications[1].path.as_deref(),
            Some(Path::new("/srv/api"))
        );
    }

    #[test]
    fn test_read_vars_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.yml");
        fs::write(&path, "instances: 3\nhost: web\ndebug: true\n").unwrap();

        let vars = read_vars_file(&path).unwrap();
        assert_eq!(vars["instances"], "3");
        assert_eq!(vars["host"], "web");
        assert_eq!(vars["debug"], "true");
    }
}
