// backuptool/src/schedule/mod.rs
//! Single-task timer loop driving the backup orchestrator.
//!
//! Each job keeps its own next fire time. The loop sleeps until the earliest
//! one, then fires every job whose time has passed in registration order,
//! awaiting each backup before looking at the next job. Attempts therefore
//! never overlap.

mod policy;
mod trigger;

use chrono::{DateTime, Local};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::backup::{AttemptOutcome, BackupOrchestrator};
use crate::config::ScheduleMode;
use crate::history::HistoryStore;
use crate::upload::Uploader;

pub use policy::DuePolicy;
pub use trigger::Trigger;

// Upper bound on a single sleep so wall-clock jumps (suspend, NTP) are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(30);

/// Anything the scheduler can ask to run a backup.
pub trait BackupRunner {
    fn perform_backup(&self) -> impl Future<Output = AttemptOutcome>;
}

impl<U: Uploader> BackupRunner for BackupOrchestrator<U> {
    async fn perform_backup(&self) -> AttemptOutcome {
        BackupOrchestrator::perform_backup(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    /// Ask the due-date policy first; skip when the last success is recent.
    WhenDue(DuePolicy),
    /// Always run the backup.
    Always,
}

#[derive(Debug, Clone)]
struct ScheduledJob {
    trigger: Trigger,
    action: JobAction,
    next_run: DateTime<Local>,
}

pub struct Scheduler<R> {
    jobs: Vec<ScheduledJob>,
    runner: R,
    history: HistoryStore,
}

impl<R: BackupRunner> Scheduler<R> {
    pub fn new(runner: R, history: HistoryStore) -> Self {
        Scheduler {
            jobs: Vec::new(),
            runner,
            history,
        }
    }

    /// Registers the jobs for the configured mode. The mode cannot change afterwards.
    pub fn from_mode(
        mode: &ScheduleMode,
        interval_days: u32,
        runner: R,
        history: HistoryStore,
        now: DateTime<Local>,
    ) -> Self {
        let mut scheduler = Scheduler::new(runner, history);
        match mode {
            ScheduleMode::Interval { at } => {
                scheduler.add_job(Trigger::Daily(*at), JobAction::WhenDue(DuePolicy::new(interval_days)), now);
            }
            ScheduleMode::FixedWeekdays(slots) => {
                for slot in slots {
                    scheduler.add_job(Trigger::Weekly(slot.weekday, slot.at), JobAction::Always, now);
                }
            }
            ScheduleMode::Development { period } => {
                scheduler.add_job(Trigger::Every(*period), JobAction::Always, now);
            }
        }
        scheduler
    }

    pub fn add_job(&mut self, trigger: Trigger, action: JobAction, now: DateTime<Local>) {
        let next_run = trigger.next_after(now);
        info!("Backup scheduled {}, next run at {}", trigger, next_run.format("%Y-%m-%d %H:%M:%S"));
        self.jobs.push(ScheduledJob {
            trigger,
            action,
            next_run,
        });
    }

    #[cfg(test)]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Earliest pending fire time across all jobs.
    pub fn next_run(&self) -> Option<DateTime<Local>> {
        self.jobs.iter().map(|job| job.next_run).min()
    }

    /// Fires every job due at `now`, in registration order, and reschedules it
    /// relative to `now`. Returns how many jobs fired.
    pub async fn run_pending(&mut self, now: DateTime<Local>) -> usize {
        let mut fired = 0;
        for job in self.jobs.iter_mut() {
            if job.next_run > now {
                continue;
            }
            fired += 1;
            fire(&self.runner, &self.history, job.action, now).await;
            job.next_run = job.trigger.next_after(now);
            debug!("Next run {} at {}", job.trigger, job.next_run.format("%Y-%m-%d %H:%M:%S"));
        }
        fired
    }

    /// Runs the timer loop. Never returns.
    pub async fn run_forever(&mut self) {
        loop {
            self.run_pending(Local::now()).await;
            let wait = self
                .next_run()
                .map(|next| (next - Local::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(MAX_SLEEP)
                .min(MAX_SLEEP);
            tokio::time::sleep(wait).await;
        }
    }
}

async fn fire<R: BackupRunner>(runner: &R, history: &HistoryStore, action: JobAction, now: DateTime<Local>) {
    match action {
        JobAction::Always => {
            info!("Scheduled backup triggered");
            runner.perform_backup().await;
        }
        JobAction::WhenDue(policy) => {
            info!("Checking whether a backup is due...");
            let last_success = history.last_success_timestamp().await;
            let decision = policy.evaluate(last_success, now.naive_local());
            if decision.is_due() {
                info!("Backup is due: {}", decision);
                runner.perform_backup().await;
            } else {
                info!(
                    "No backup needed yet: {}, interval is {} day(s)",
                    decision, policy.interval_days
                );
            }
        }
    }
}
