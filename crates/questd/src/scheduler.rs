//! Cooperative job scheduler.
//!
//! Jobs run serially on the caller of [`Scheduler::tick`]. The first tick
//! only arms each job; a job's clock moves forward only when it runs.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use tracing::{debug, info, warn};

use quest_common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// At most once per interval
    Every(Duration),
    /// On each UTC date change
    Daily,
    /// On a UTC date change that lands on the given weekday
    Weekly(Weekday),
}

impl Cadence {
    pub fn is_due(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Cadence::Every(interval) => now - last >= *interval,
            Cadence::Daily => now.date_naive() != last.date_naive(),
            Cadence::Weekly(day) => now.date_naive() != last.date_naive() && now.weekday() == *day,
        }
    }
}

pub type Job = Box<dyn FnMut(DateTime<Utc>) -> Result<()> + Send>;

struct Entry {
    name: String,
    cadence: Cadence,
    job: Job,
    last: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, cadence: Cadence, job: F)
    where
        F: FnMut(DateTime<Utc>) -> Result<()> + Send + 'static,
    {
        debug!("Scheduled '{}' ({:?})", name, cadence);
        self.entries.push(Entry {
            name: name.to_string(),
            cadence,
            job: Box::new(job),
            last: None,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Run every due job in registration order; returns the names that ran.
    /// A failing job is logged and still counts as run.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut ran = Vec::new();
        for entry in &mut self.entries {
            let Some(last) = entry.last else {
                entry.last = Some(now);
                continue;
            };
            if !entry.cadence.is_due(last, now) {
                continue;
            }
            entry.last = Some(now);
            match (entry.job)(now) {
                Ok(()) => info!("Job '{}' ran", entry.name),
                Err(e) => warn!("Job '{}' failed: {}", entry.name, e),
            }
            ran.push(entry.name.clone());
        }
        ran
    }
}
