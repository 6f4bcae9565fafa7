use super::load_inputs;
use crate::PushArgs;
use crate::backend::connect;
use colored::Colorize;
use pushflow_push::{ChangeCategory, PlanFailure, PushPlan, create_push_plans};

enum Entry<'a> {
    Plan(&'a PushPlan),
    Failure(&'a PlanFailure),
}

pub async fn handle(args: PushArgs) -> anyhow::Result<i32> {
    let inputs = load_inputs(&args)?;
    let session = connect(args.dry_run)?;

    let batch = create_push_plans(
        session.control_plane.as_ref(),
        &session.target,
        &inputs.manifest,
        &inputs.overrides,
    )
    .await?;

    let mut entries: Vec<(usize, Entry)> = batch
        .plans
        .iter()
        .map(|plan| (plan.position(), Entry::Plan(plan)))
        .chain(
            batch
                .failures
                .iter()
                .map(|failure| (failure.position, Entry::Failure(failure))),
        )
        .collect();
    entries.sort_by_key(|(position, _)| *position);

    for (_, entry) in &entries {
        match entry {
            Entry::Plan(plan) => print_plan(plan),
            Entry::Failure(failure) => {
                println!();
                println!(
                    "{} {}: {}",
                    "✗".red(),
                    failure.app_name.bold(),
                    failure.error.to_string().red()
                );
            }
        }
    }

    if !batch.warnings.is_empty() {
        println!();
        for warning in batch.warnings.iter() {
            println!("{} {}", "⚠".yellow(), warning.yellow());
        }
    }

    Ok(if batch.failures.is_empty() { 0 } else { 1 })
}

fn print_plan(plan: &PushPlan) {
    println!();
    let action = match plan.app_guid() {
        None => "to create".green(),
        Some(_) if plan.has_changes() => "to update".yellow(),
        Some(_) => "up to date".dimmed(),
    };
    println!("{} ({})", plan.app_name().cyan().bold(), action);

    if plan.needs_restart() && !plan.no_start() {
        println!("  strategy: {}", plan.effective_strategy());
    }

    for change in plan.changes().iter() {
        let marker = match change.category() {
            ChangeCategory::Create => "+".green(),
            ChangeCategory::Update => "~".yellow(),
            ChangeCategory::Package => "↑".blue(),
            ChangeCategory::Route => "→".blue(),
            ChangeCategory::Start => "▶".green(),
        };
        println!("  {} {}", marker, change);
    }

    for route in plan.routes() {
        let state = if route.mapped { "mapped" } else { "unmapped" };
        println!("  {} {} ({})", "route".dimmed(), route.url(), state);
    }
}
