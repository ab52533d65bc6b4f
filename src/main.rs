//! Scheduled directory backup tool
//!
//! Archives a source directory, uploads the archive to remote storage and keeps
//! a history of every attempt in SQLite.

// backuptool/src/main.rs
mod backup;
mod config;
mod errors;
mod history;
mod logging;
mod schedule;
mod upload;

use anyhow::{Context, Result};
use chrono::Local;
use config::{AppConfig, ScheduleMode};
use history::HistoryStore;
use schedule::{DuePolicy, Scheduler};
use std::env;
use std::process::ExitCode;
use tracing::info;

const STATUS_RECORD_LIMIT: u32 = 10;

#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    dotenv::dotenv().ok();

    let app_config = AppConfig::from_env().context("Failed to load configuration from environment")?;
    let _log_guard = logging::init(&app_config.log_file)?;

    let history = HistoryStore::new(&app_config.db_path);
    history.initialize().await;

    let choice = env::args().nth(1).map(|arg| arg.trim().to_string());

    match choice.as_deref() {
        None | Some("run") | Some("daemon") => {
            let orchestrator = backup::build_orchestrator(&app_config, history.clone());
            let mut scheduler = Scheduler::from_mode(
                &app_config.schedule,
                app_config.interval_days,
                orchestrator,
                history,
                Local::now(),
            );
            info!("Backup scheduler started");
            scheduler.run_forever().await;
        }
        Some("backup") | Some("once") => {
            let orchestrator = backup::build_orchestrator(&app_config, history);
            let outcome = orchestrator.perform_backup().await;
            if !outcome.is_success() {
                anyhow::bail!("Backup attempt did not succeed: {:?}", outcome);
            }
            println!("✅ Backup completed successfully.");
        }
        Some("status") => print_status(&app_config, &history).await?,
        Some(other) => {
            println!("❌ Invalid choice '{}'. Use 'run', 'backup' or 'status'.", other);
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prints the last success, whether interval mode would back up now, and recent attempts.
async fn print_status(app_config: &AppConfig, history: &HistoryStore) -> Result<()> {
    let last_success = history.last_success_timestamp().await;
    match last_success {
        Some(ts) => println!("Last successful backup: {}", ts.format(history::TIMESTAMP_FORMAT)),
        None => println!("Last successful backup: never"),
    }

    match &app_config.schedule {
        ScheduleMode::Interval { at } => {
            let decision = DuePolicy::new(app_config.interval_days).evaluate(last_success, Local::now().naive_local());
            println!(
                "Interval mode, checked daily at {}: {} ({})",
                at.format("%H:%M"),
                if decision.is_due() { "due" } else { "not due" },
                decision
            );
        }
        ScheduleMode::FixedWeekdays(slots) => {
            let days: Vec<String> = slots
                .iter()
                .map(|slot| format!("{} {}", slot.weekday, slot.at.format("%H:%M")))
                .collect();
            println!("Weekly mode: {}", days.join(", "));
        }
        ScheduleMode::Development { period } => {
            println!("Development mode: every {}s", period.as_secs());
        }
    }

    let records = history
        .recent(STATUS_RECORD_LIMIT)
        .await
        .with_context(|| format!("Failed to read history from {}", history.path().display()))?;
    if records.is_empty() {
        println!("No backups recorded yet.");
    }
    for record in records {
        println!(
            "#{} {} {} [{}] {}",
            record.id, record.timestamp, record.backup_name, record.status, record.message
        );
    }
    Ok(())
}
