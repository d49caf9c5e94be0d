//! Wayfarer preload driver.
//!
//! Reads a manifest of simulated resources and runs them through the
//! scheduler the way a page would:
//! - Critical, then High (`preload_critical`)
//! - Medium, then Low
//! - the Idle tier through the background idle loader
//!
//! Prints the final state of every resource and exits non-zero if any ended in error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use wayfarer_scheduler::{Priority, Scheduler};

use crate::manifest::Manifest;
use crate::report::Report;

mod manifest;
mod report;

/// Preload command line arguments.
#[derive(Parser, Debug)]
#[command(name = "wayfarer-preload")]
#[command(about = "Run a resource manifest through the progressive loading scheduler")]
struct Args {
	/// Manifest describing the resources to load
	#[arg(value_name = "MANIFEST")]
	manifest: PathBuf,

	/// Print the report as JSON
	#[arg(long)]
	json: bool,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let manifest = Manifest::load(&args.manifest).with_context(|| format!("loading manifest {}", args.manifest.display()))?;
	let scheduler = Scheduler::new(manifest.config());
	manifest.register_all(&scheduler).context("registering resources")?;
	info!(resources = manifest.resources.len(), "starting preload");

	let _transitions = scheduler.subscribe(|n| {
		info!(seq = n.seq, resource = %n.id, state = n.state.as_str(), "transition");
	});
	run(&scheduler).await;

	let report = Report::collect(&scheduler.get_all_results());
	if args.json {
		println!("{}", serde_json::to_string_pretty(&report)?);
	} else {
		print!("{}", report.table());
	}

	Ok(if report.failed > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Loads every tier in order and returns once the idle queue has drained.
async fn run(scheduler: &Scheduler) {
	let mut events = scheduler.notifications();

	scheduler.preload_critical().await;
	info!(stats = ?scheduler.stats(), "critical path settled");
	for priority in [Priority::Medium, Priority::Low] {
		scheduler.load_by_priority(priority).await;
	}

	let idle = scheduler.start_idle_loading();
	while scheduler.queued(Priority::Idle) > 0 || scheduler.stats().in_flight > 0 {
		if events.recv().await.is_none() {
			break;
		}
	}
	idle.stop().await;
	info!(stats = ?scheduler.stats(), "preload finished");
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("wayfarer_scheduler=trace,wayfarer_preload=debug,info")
		} else {
			EnvFilter::new("wayfarer_preload=info,warn")
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();
}
