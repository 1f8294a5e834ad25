mod args;
mod logging;
mod settings;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{info, warn};

use args::Args;
use exploitmap_core::{CancellationToken, EngineError, Orchestrator};
use exploitmap_output::{MASKED_TARGET, ReportFormatter, TextFormatter, mask};
use exploitmap_types::ExploitConfiguration;
use exploitmap_vuln::parse_findings_file;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    // Error chains can carry addresses from the service or the scan.
    run(args).await.map_err(|e| anyhow!(mask(&format!("{e:#}"))))
}

async fn run(args: Args) -> Result<()> {
    let mut config = settings::load_settings(args.config.as_deref())?;
    settings::apply_args(&mut config, &args);

    // Parse before connecting so a bad scan file never touches the service.
    let findings = parse_findings_file(&args.scan)
        .with_context(|| format!("failed to read scan '{}'", args.scan.display()))?;
    info!(findings = findings.len(), "scan loaded");

    let orchestrator = Orchestrator::connect(&config)
        .await
        .context("failed to start orchestrator")?;

    if args.dry_run {
        let configs = orchestrator.plan(&findings).await;
        print_plan(&configs);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, waiting for running attempts to stop...");
            interrupt.cancel();
        }
    });

    match orchestrator.run_findings(&findings, cancel).await {
        Ok(outcome) => {
            print!("{}", TextFormatter.format(&outcome.report)?);
            println!();
            println!("{}", outcome.summary);
            println!("Report written to {}", outcome.report_path.display());
            Ok(())
        }
        Err(EngineError::Output(e)) => {
            // Attempts already ran; show what happened before failing.
            warn!(error = %mask(&e.to_string()), "report could not be written");
            let collector = &orchestrator.context().collector;
            print!("{}", TextFormatter.format(&collector.report())?);
            println!();
            println!("{}", collector.summarize());
            Err(EngineError::Output(e)).context("failed to persist report")
        }
        Err(e) => Err(e).context("run failed"),
    }
}

fn print_plan(configs: &[ExploitConfiguration]) {
    if configs.is_empty() {
        println!("No exploit modules matched the scan findings.");
        return;
    }
    println!("{:<10} {:<6} {:<16} MODULE", "TARGET", "PORT", "CVE");
    for config in configs {
        println!(
            "{:<10} {:<6} {:<16} {}",
            MASKED_TARGET, config.target_port, config.cve, config.module_path
        );
    }
    println!("\n{} planned attempt(s), nothing executed (dry run)", configs.len());
}
