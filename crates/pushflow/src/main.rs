mod backend;
mod commands;
mod manifest;
mod progress;

use clap::{Args, Parser, Subcommand};
use pushflow_core::{DeploymentStrategy, HealthCheckType, Megabytes};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pushflow")]
#[command(about = "Push applications to your platform from a manifest", long_about = None)]
struct Cli {
    /// Log API calls and state transitions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push one or all applications of the manifest
    Push(PushArgs),
    /// Show what a push would change without changing anything
    Plan(PushArgs),
    /// Show version information
    Version,
}

/// Flags shared by `push` and `plan`
#[derive(Args, Debug, Clone, Default)]
pub struct PushArgs {
    /// Application to push (all applications of the manifest if omitted)
    pub app_name: Option<String>,

    /// Path to the manifest
    #[arg(short = 'f', long = "manifest")]
    pub manifest: Option<PathBuf>,

    /// Ignore the manifest even if one is found
    #[arg(long, conflicts_with = "manifest")]
    pub no_manifest: bool,

    /// Variable substitution for the manifest (KEY=VALUE)
    #[arg(long = "var", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// YAML file with variable substitutions for the manifest
    #[arg(long = "vars-file")]
    pub vars_files: Vec<PathBuf>,

    /// Buildpack name or url; repeat for multiple buildpacks
    #[arg(short = 'b', long = "buildpack")]
    pub buildpacks: Vec<String>,

    /// Stack to use
    #[arg(short = 's', long)]
    pub stack: Option<String>,

    /// Do not map a route to the app
    #[arg(long)]
    pub no_route: bool,

    /// Create a random route for the app
    #[arg(long)]
    pub random_route: bool,

    /// Number of instances
    #[arg(short = 'i', long, allow_negative_numbers = true)]
    pub instances: Option<i64>,

    /// Memory limit (e.g. 256M, 1G)
    #[arg(short = 'm', long)]
    pub memory: Option<Megabytes>,

    /// Disk limit (e.g. 256M, 1G)
    #[arg(short = 'k', long = "disk")]
    pub disk: Option<Megabytes>,

    /// Deployment strategy for running apps: none, rolling or canary
    #[arg(long, default_value = "none")]
    pub strategy: DeploymentStrategy,

    /// Upload and configure the app without starting it
    #[arg(long)]
    pub no_start: bool,

    /// Docker image to push instead of application bits
    #[arg(short = 'o', long)]
    pub docker_image: Option<String>,

    /// Username for a private docker registry (password from CF_DOCKER_PASSWORD)
    #[arg(long)]
    pub docker_username: Option<String>,

    /// Health check type: port, process or http
    #[arg(short = 'u', long = "health-check-type")]
    pub health_check_type: Option<HealthCheckType>,

    /// Endpoint for the http health check
    #[arg(long = "endpoint")]
    pub health_check_endpoint: Option<String>,

    /// Seconds allowed for the app to start
    #[arg(short = 't', long = "app-start-timeout")]
    pub health_check_timeout: Option<u32>,

    /// Path to the app directory or a zip file
    #[arg(short = 'p', long)]
    pub path: Option<PathBuf>,

    /// Prebuilt droplet to push instead of staging app bits
    #[arg(long = "droplet", value_name = "PATH")]
    pub droplet: Option<PathBuf>,

    /// Start command for the app
    #[arg(short = 'c', long = "start-command")]
    pub start_command: Option<String>,

    /// Run against a simulated platform; nothing remote is touched
    #[arg(long)]
    pub dry_run: bool,

    /// Give up on the whole command after this many seconds
    #[arg(long = "timeout")]
    pub timeout_secs: Option<u64>,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Commands::Push(args) => commands::push::handle(args).await?,
        Commands::Plan(args) => commands::plan::handle(args).await?,
        Commands::Version => {
            println!("pushflow {}", env!("CARGO_PKG_VERSION"));
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("HOST=example.com"),
            Ok(("HOST".to_string(), "example.com".to_string()))
        );
        assert_eq!(
            parse_var("URL=https://a.b/?x=1"),
            Ok(("URL".to_string(), "https://a.b/?x=1".to_string()))
        );
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=value").is_err());
    }

    #[test]
    fn test_push_flags() {
        let cli = Cli::parse_from([
            "pushflow", "push", "web", "-i", "3", "-m", "512M", "--strategy", "rolling", "-b",
            "ruby_buildpack", "-b", "node_buildpack", "--var", "env=prod",
        ]);
        let Commands::Push(args) = cli.command else {
            panic!("expected push");
        };
        assert_eq!(args.app_name.as_deref(), Some("web"));
        assert_eq!(args.instances, Some(3));
        assert_eq!(args.memory, Some(Megabytes::new(512)));
        assert_eq!(args.strategy, DeploymentStrategy::Rolling);
        assert_eq!(args.buildpacks, vec!["ruby_buildpack", "node_buildpack"]);
        assert_eq!(args.vars, vec![("env".to_string(), "prod".to_string())]);
    }

    #[test]
    fn test_negative_instances_reach_validation() {
        let cli = Cli::parse_from(["pushflow", "push", "web", "-i", "-1"]);
        let Commands::Push(args) = cli.command else {
            panic!("expected push");
        };
        assert_eq!(args.instances, Some(-1));
    }
}
