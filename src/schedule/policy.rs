// backuptool/src/schedule/policy.rs
use chrono::NaiveDateTime;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueDecision {
    NoPriorSuccess,
    Elapsed { days: i64 },
    NotYet { days: i64 },
}

impl DueDecision {
    pub fn is_due(&self) -> bool {
        !matches!(self, DueDecision::NotYet { .. })
    }
}

impl fmt::Display for DueDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DueDecision::NoPriorSuccess => write!(f, "no successful backup on record"),
            DueDecision::Elapsed { days } => write!(f, "{} day(s) since the last successful backup", days),
            DueDecision::NotYet { days } => write!(f, "only {} day(s) since the last successful backup", days),
        }
    }
}

/// Interval-mode rule: a backup is due once whole elapsed days reach `interval_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuePolicy {
    pub interval_days: u32,
}

impl DuePolicy {
    pub fn new(interval_days: u32) -> Self {
        DuePolicy { interval_days }
    }

    /// Elapsed time is truncated to whole 24 hour periods; the boundary is inclusive.
    pub fn evaluate(&self, last_success: Option<NaiveDateTime>, now: NaiveDateTime) -> DueDecision {
        let Some(last) = last_success else {
            return DueDecision::NoPriorSuccess;
        };
        let days = (now - last).num_days();
        if days >= i64::from(self.interval_days) {
            DueDecision::Elapsed { days }
        } else {
            DueDecision::NotYet { days }
        }
    }
}
