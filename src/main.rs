mod cli;
mod ui;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command, event_query};
use cronicle_hooks::{ClientConfig, CronicleError, HttpSchedulerApi, SchedulerApi, Scheduler};
use tracing_subscriber::EnvFilter;
use ui::JobProgress;

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,cronicle_hooks=debug"
    } else {
        "warn,cronicle_hooks=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = ClientConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Event { event, title } => {
            let Some(query) = event_query(&event, title) else {
                bail!("An event id or title is required");
            };
            let api = HttpSchedulerApi::new(&config.base_url, config.api_key.clone(), config.request_timeout())?;
            let event = api.get_event(&query)?;
            println!("{}", serde_json::to_string_pretty(&event)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            event,
            title,
            detach,
            poll_secs,
        } => {
            let Some(query) = event_query(&event, title) else {
                bail!("An event id or title is required");
            };
            let scheduler = Scheduler::connect(&config)?;
            let event = scheduler.get_event(&query)?;
            if !event.is_enabled() {
                bail!("Event {} is disabled", event.title);
            }

            let progress = JobProgress::start(&event.title);
            let queued = scheduler.run_event(&event)?;
            let job = match queued.wait_for_job() {
                Ok(job) => job,
                Err(e) => {
                    progress.launch_failed(&e);
                    return Ok(ExitCode::FAILURE);
                }
            };
            progress.started(&job);
            if detach {
                progress.detached(&job);
                return Ok(ExitCode::SUCCESS);
            }

            let poll = Duration::from_secs(poll_secs.max(1));
            let job = loop {
                match job.wait_for_complete_timeout(poll) {
                    Ok(job) => break job,
                    Err(CronicleError::Timeout(_)) => {
                        if let Err(e) = job.refresh_status() {
                            progress.warn(&format!("status refresh failed: {e}"));
                        }
                        progress.update(&job);
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            progress.finish(&job);
            scheduler.shutdown();

            Ok(if job.is_failed() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}
