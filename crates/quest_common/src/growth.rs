//! Growth history: point-in-time records of a user's progression.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::user::{AttributeSet, User};

/// Timelines longer than this are thinned for display
pub const MAX_TIMELINE_POINTS: usize = 200;

pub const CSV_HEADER: &str = "timestamp,level,growth,execution,perseverance,decision,knowledge,\
social,pride,achievements,completed_tasks,failed_tasks,journal_entries";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthSnapshot {
    pub id: i64,
    pub owner: String,
    pub timestamp: DateTime<Utc>,
    pub level: u32,
    pub growth_points: i64,
    pub attributes: AttributeSet,
    pub achievement_count: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub journal_entries: u32,
}

impl GrowthSnapshot {
    pub fn of(user: &User, timestamp: DateTime<Utc>, journal_entries: u32) -> Self {
        Self {
            id: 0,
            owner: user.username.clone(),
            timestamp,
            level: user.level(),
            growth_points: user.growth_points(),
            attributes: *user.attributes(),
            achievement_count: user.progress.achievements_unlocked,
            completed_tasks: user.progress.total_tasks_completed,
            failed_tasks: user.progress.total_tasks_failed,
            journal_entries,
        }
    }

    pub fn csv_row(&self) -> String {
        let a = &self.attributes;
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.level,
            self.growth_points,
            a.execution,
            a.perseverance,
            a.decision,
            a.knowledge,
            a.social,
            a.pride,
            self.achievement_count,
            self.completed_tasks,
            self.failed_tasks,
            self.journal_entries
        )
    }
}

/// Keep every `len / MAX + 1`-th snapshot once the timeline is too long
pub fn thin_timeline(snapshots: Vec<GrowthSnapshot>) -> Vec<GrowthSnapshot> {
    if snapshots.len() <= MAX_TIMELINE_POINTS {
        return snapshots;
    }
    let step = snapshots.len() / MAX_TIMELINE_POINTS + 1;
    snapshots.into_iter().step_by(step).collect()
}

pub fn export_csv(snapshots: &[GrowthSnapshot]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for snapshot in snapshots {
        out.push_str(&snapshot.csv_row());
        out.push('\n');
    }
    out
}
