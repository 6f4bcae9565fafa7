use super::load_inputs;
use crate::PushArgs;
use crate::backend::connect;
use crate::progress::TerminalSink;
use colored::Colorize;
use pushflow_push::{
    ActualizeConfig, Actualizer, CancelHandle, PushReport, create_push_plans, push_all,
};
use std::sync::Arc;
use std::time::Duration;

pub async fn handle(args: PushArgs) -> anyhow::Result<i32> {
    let inputs = load_inputs(&args)?;
    let session = connect(args.dry_run)?;

    println!(
        "{} org {} / space {}",
        "Pushing to".bold(),
        session.target.org_name.cyan(),
        session.target.space_name.cyan()
    );

    let batch = create_push_plans(
        session.control_plane.as_ref(),
        &session.target,
        &inputs.manifest,
        &inputs.overrides,
    )
    .await?;

    let mut config = ActualizeConfig::from(&inputs.config);
    if let Some(secs) = args.timeout_secs {
        config = config.with_deadline(Duration::from_secs(secs));
    }
    let actualizer = Actualizer::new(Arc::clone(&session.control_plane), config);

    let (cancel, signal) = CancelHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "Interrupted, stopping the push...".yellow());
            cancel.cancel();
        }
    });

    let sink = Arc::new(TerminalSink::new());
    let report = push_all(&actualizer, batch, sink, signal).await;

    print_report(&report);
    Ok(report.exit_code())
}

fn print_report(report: &PushReport) {
    println!();
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(()) => println!("{} {}", "✓".green(), outcome.app_name.bold()),
            Err(err) => println!(
                "{} {}: {}",
                "✗".red(),
                outcome.app_name.bold(),
                err.to_string().red()
            ),
        }
    }

    if !report.warnings.is_empty() {
        println!();
        for warning in report.warnings.iter() {
            println!("{} {}", "⚠".yellow(), warning.yellow());
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        println!();
        println!(
            "{}",
            format!("{} of {} apps failed", failed, report.outcomes.len())
                .red()
                .bold()
        );
    }
}
