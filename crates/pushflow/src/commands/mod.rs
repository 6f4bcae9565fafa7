pub mod plan;
pub mod push;

use crate::PushArgs;
use crate::manifest::{default_app_paths, read_manifest, read_vars_file};
use anyhow::Context;
use colored::Colorize;
use pushflow_core::{FlagOverrides, Manifest};
use pushflow_config::{PushConfig, find_manifest};
use std::collections::HashMap;
use std::path::PathBuf;

/// Everything a push needs before talking to the platform
pub struct PushInputs {
    pub manifest: Manifest,
    pub overrides: FlagOverrides,
    pub config: PushConfig,
}

/// Read settings, variables and the manifest for `args`.
pub fn load_inputs(args: &PushArgs) -> anyhow::Result<PushInputs> {
    let config = PushConfig::from_env().context("Invalid push settings")?;

    let mut vars = HashMap::new();
    for file in &args.vars_files {
        vars.extend(read_vars_file(file)?);
    }
    vars.extend(args.vars.iter().cloned());

    let overrides = overrides_from_args(args, &config, vars);

    let manifest = match manifest_path(args)? {
        Some(path) => {
            println!("{} {}", "Using manifest file".dimmed(), path.display());
            let mut manifest = read_manifest(&path, &overrides.vars)?;
            default_app_paths(&mut manifest, &path, &overrides);
            manifest
        }
        None => Manifest::default(),
    };

    Ok(PushInputs {
        manifest,
        overrides,
        config,
    })
}

fn manifest_path(args: &PushArgs) -> anyhow::Result<Option<PathBuf>> {
    if args.no_manifest {
        return Ok(None);
    }
    if let Some(path) = &args.manifest {
        let path = if path.is_dir() {
            path.join("manifest.yml")
        } else {
            path.clone()
        };
        if !path.is_file() {
            anyhow::bail!("Manifest not found: {}", path.display());
        }
        return Ok(Some(path));
    }
    let cwd = std::env::current_dir()?;
    Ok(find_manifest(&cwd)?)
}

fn overrides_from_args(
    args: &PushArgs,
    config: &PushConfig,
    vars: HashMap<String, String>,
) -> FlagOverrides {
    FlagOverrides {
        app_name: args.app_name.clone(),
        buildpacks: args.buildpacks.clone(),
        stack: args.stack.clone(),
        no_route: args.no_route,
        random_route: args.random_route,
        instances: args.instances,
        memory: args.memory,
        disk: args.disk,
        strategy: args.strategy,
        no_start: args.no_start,
        docker_image: args.docker_image.clone(),
        docker_username: args.docker_username.clone(),
        docker_password: config.docker_password.clone(),
        health_check_type: args.health_check_type,
        health_check_endpoint: args.health_check_endpoint.clone(),
        health_check_timeout: args.health_check_timeout,
        path: args.path.clone(),
        droplet_path: args.droplet.clone(),
        start_command: args.start_command.clone(),
        vars,
    }
}
