//! Headless reminder host.
//!
//! Loads a batch file (`{"householdId", "petNames", "records"}`) and runs
//! the reminder scheduler against it, logging notifications and diagnostics
//! to stderr. Exits once every armed reminder has fired, or on Ctrl-C.
//!
//! Usage: `hearth-reminders <batch.json> [--config <reminders.toml>]`

use anyhow::Context;
use hearth::diagnostics::{DiagnosticsPublisher, LogDiagnosticsSink};
use hearth::reminders::{LogNotifier, StaticPermissionGate};
use hearth::{ReminderConfig, ReminderRecord, ReminderScheduler, ScheduleOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchFile {
    #[serde(flatten)]
    options: ScheduleOptions,
    #[serde(default)]
    records: Vec<ReminderRecord>,
}

struct Args {
    batch_path: PathBuf,
    config_path: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut args = std::env::args().skip(1);
    let mut batch_path = None;
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "help" | "--help" | "-h" => return Ok(None),
            other if batch_path.is_none() => batch_path = Some(PathBuf::from(other)),
            other => anyhow::bail!("unexpected argument `{other}`"),
        }
    }

    let batch_path = batch_path.context("missing batch file path")?;
    Ok(Some(Args {
        batch_path,
        config_path,
    }))
}

fn print_usage() {
    eprintln!("Usage: hearth-reminders <batch.json> [--config <reminders.toml>]");
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ReminderConfig> {
    match path {
        Some(path) => ReminderConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display())),
        None => {
            let default_path = ReminderConfig::default_config_path();
            if default_path.is_file() {
                ReminderConfig::from_file(&default_path)
                    .with_context(|| format!("cannot load config {}", default_path.display()))
            } else {
                Ok(ReminderConfig::default())
            }
        }
    }
}

fn load_batch(path: &Path) -> anyhow::Result<BatchFile> {
    let bytes =
        std::fs::read(path).with_context(|| format!("cannot read batch {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("cannot parse batch {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hearth=info")),
        )
        .init();

    let Some(args) = parse_args()? else {
        print_usage();
        return Ok(());
    };
    let config = load_config(args.config_path.as_deref())?;
    let batch = load_batch(&args.batch_path)?;

    let scheduler = ReminderScheduler::builder(
        Arc::new(StaticPermissionGate::granted()),
        Arc::new(LogNotifier),
    )
    .with_config(config.clone())
    .build();
    scheduler.init();

    let cancel = CancellationToken::new();
    let publisher = config.diagnostics.enabled.then(|| {
        let publisher = DiagnosticsPublisher::new(
            Arc::new(LogDiagnosticsSink),
            &config.diagnostics,
            cancel.child_token(),
        );
        tokio::spawn(publisher.run(scheduler.subscribe_stats()))
    });

    tracing::info!(
        household_id = %batch.options.household_id,
        records = batch.records.len(),
        "hearth-reminders starting"
    );
    scheduler.schedule_many(batch.records, batch.options).await;

    let mut stats_rx = scheduler.subscribe_stats();
    loop {
        if stats_rx.borrow_and_update().active_timers == 0 {
            tracing::info!("no reminders left to fire");
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, cancelling reminders");
                break;
            }
            changed = stats_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    scheduler.cancel_all();
    cancel.cancel();
    if let Some(publisher) = publisher {
        publisher.await.context("diagnostics publisher panicked")?;
    }
    tracing::info!("hearth-reminders shut down cleanly");
    Ok(())
}
