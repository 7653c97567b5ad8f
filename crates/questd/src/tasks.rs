//! Task lifecycle manager.
//!
//! Tasks are cached in memory and mirrored to the `tasks` table. Completion,
//! progress, failure and the periodic resets all work on a copy of the
//! affected tasks and swap it into the cache only after the store commit.
//! Resets and deadline checks re-read the table inside their transaction, so
//! tasks written by another process are never missed or overwritten.
//! Events go out once the cache lock is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use quest_common::events::{TaskCompleted, TaskProgressed};
use quest_common::task::{TYPE_COMPLETION_MILESTONE, WEEKLY_STREAK_CYCLE};
use quest_common::{
    EventBus, FailureOutcome, PropEffect, QuestError, Result, Task, TaskReward, TaskType,
};

use crate::inventory::Inventory;
use crate::ledger::{Ledger, LedgerChanges};
use crate::store::Store;

/// What one completion paid out
#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub task_id: i64,
    pub reward: TaskReward,
    /// Growth multiplier from an active double-growth card (1.0 without one)
    pub growth_multiplier: f64,
    /// Coin and growth multiplier from a check-in buff (1.0 without one)
    pub reward_boost: f64,
    pub achievement_credits: u32,
    pub streak: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub task: Task,
    pub completion: Option<CompletionReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetSummary {
    pub task_type: TaskType,
    pub reset: usize,
    /// A rest day token kept incomplete streaks alive
    pub streaks_kept: bool,
    pub deadlines_failed: usize,
}

#[derive(Default)]
struct TaskCache {
    tasks: BTreeMap<i64, Task>,
    completions: HashMap<TaskType, u32>,
}

/// Events collected under the lock, published after it is released
#[derive(Default)]
struct Outbox {
    progressed: Option<TaskProgressed>,
    completed: Option<TaskCompleted>,
    changes: LedgerChanges,
}

pub struct TaskManager {
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    inventory: Arc<Inventory>,
    bus: Arc<EventBus>,
    cache: Mutex<TaskCache>,
}

impl TaskManager {
    pub fn new(
        store: Arc<Store>,
        ledger: Arc<Ledger>,
        inventory: Arc<Inventory>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let manager = Self {
            store,
            ledger,
            inventory,
            bus,
            cache: Mutex::new(TaskCache::default()),
        };
        manager.refresh()?;
        Ok(manager)
    }

    fn cache(&self) -> Result<MutexGuard<'_, TaskCache>> {
        self.cache
            .lock()
            .map_err(|_| QuestError::Persistence("task cache lock poisoned".into()))
    }

    /// Re-hydrate the cache from the store
    pub fn refresh(&self) -> Result<usize> {
        let tasks = self.store.load_tasks()?;
        let mut completions: HashMap<TaskType, u32> = HashMap::new();
        for task in tasks.iter().filter(|t| t.completed) {
            *completions.entry(task.task_type).or_default() += 1;
        }
        let count = tasks.len();
        let mut cache = self.cache()?;
        cache.tasks = tasks.into_iter().map(|t| (t.id, t)).collect();
        cache.completions = completions;
        debug!("task cache holds {} tasks", count);
        Ok(count)
    }

    fn load_fresh(&self) -> Result<BTreeMap<i64, Task>> {
        Ok(self.store.load_tasks()?.into_iter().map(|t| (t.id, t)).collect())
    }

    /// Cached copy, or the stored row when another process created it
    fn lookup(&self, cache: &TaskCache, id: i64) -> Result<Task> {
        if let Some(task) = cache.tasks.get(&id) {
            return Ok(task.clone());
        }
        self.store
            .find_task(id)?
            .ok_or_else(|| QuestError::not_found("task", id))
    }

    fn validate(task: &Task) -> Result<()> {
        if task.name.trim().is_empty() {
            return Err(QuestError::validation("task name cannot be empty"));
        }
        if task.coin_reward < 0 || task.growth_reward < 0 {
            return Err(QuestError::validation("task rewards cannot be negative"));
        }
        if task.attribute_reward.has_negative() {
            return Err(QuestError::validation("attribute rewards cannot be negative"));
        }
        Ok(())
    }

    pub fn create_task(&self, mut task: Task) -> Result<Task> {
        Self::validate(&task)?;
        let mut cache = self.cache()?;
        task.id = self.store.insert_task(&task)?;
        if task.completed {
            *cache.completions.entry(task.task_type).or_default() += 1;
        }
        info!("Created {} task '{}' (id {})", task.task_type, task.name, task.id);
        cache.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    /// Cache a task another component already inserted
    pub fn adopt(&self, task: Task) -> Result<()> {
        self.cache()?.tasks.insert(task.id, task);
        Ok(())
    }

    pub fn update_task(&self, task: Task) -> Result<()> {
        Self::validate(&task)?;
        let mut cache = self.cache()?;
        if !cache.tasks.contains_key(&task.id) {
            return Err(QuestError::not_found("task", task.id));
        }
        self.store.update_task(&task)?;
        cache.tasks.insert(task.id, task);
        Ok(())
    }

    pub fn remove_task(&self, id: i64) -> Result<()> {
        let mut cache = self.cache()?;
        if !cache.tasks.contains_key(&id) {
            return Err(QuestError::not_found("task", id));
        }
        self.store.delete_task(id)?;
        cache.tasks.remove(&id);
        info!("Removed task {}", id);
        Ok(())
    }

    pub fn task(&self, id: i64) -> Result<Task> {
        self.cache()?
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| QuestError::not_found("task", id))
    }

    pub fn tasks(&self) -> Result<Vec<Task>> {
        Ok(self.cache()?.tasks.values().cloned().collect())
    }

    pub fn tasks_by_type(&self, task_type: TaskType) -> Result<Vec<Task>> {
        Ok(self
            .cache()?
            .tasks
            .values()
            .filter(|t| t.task_type == task_type)
            .cloned()
            .collect())
    }

    /// Completions counted per type, in `TaskType::ALL` order
    pub fn statistics(&self) -> Result<Vec<(TaskType, u32)>> {
        let cache = self.cache()?;
        Ok(TaskType::ALL
            .iter()
            .map(|t| (*t, cache.completions.get(t).copied().unwrap_or(0)))
            .collect())
    }

    /// Returns `None` when the task was already completed this cycle
    pub fn complete_task(&self, id: i64) -> Result<Option<CompletionReport>> {
        let mut cache = self.cache()?;
        let mut next = self.lookup(&cache, id)?;
        if next.completed {
            debug!("task {} already completed", id);
            return Ok(None);
        }
        let mut outbox = Outbox::default();
        let report = self.complete_locked(&mut cache, &mut next, &mut outbox)?;
        drop(cache);

        self.flush(outbox)?;
        Ok(Some(report))
    }

    /// Adds `delta` to the task's progress; reaching the goal completes it
    pub fn update_progress(&self, id: i64, delta: i64) -> Result<ProgressUpdate> {
        let mut cache = self.cache()?;
        let mut next = self.lookup(&cache, id)?;
        let mut outbox = Outbox::default();
        let reached = next.advance_progress(delta);

        let completion = if reached && !next.completed {
            Some(self.complete_locked(&mut cache, &mut next, &mut outbox)?)
        } else {
            self.store.update_task(&next)?;
            cache.tasks.insert(id, next.clone());
            None
        };
        outbox.progressed = Some(TaskProgressed {
            task_id: id,
            value: next.progress_value(),
            goal: next.progress_goal(),
        });
        drop(cache);

        self.flush(outbox)?;
        Ok(ProgressUpdate {
            task: next,
            completion,
        })
    }

    fn complete_locked(
        &self,
        cache: &mut TaskCache,
        next: &mut Task,
        outbox: &mut Outbox,
    ) -> Result<CompletionReport> {
        let completed_of_type = cache.completions.get(&next.task_type).copied().unwrap_or(0);
        let (report, changes) = self
            .ledger
            .atomically(|| self.apply_completion(next, completed_of_type))?;

        cache.completions.insert(next.task_type, completed_of_type + 1);
        cache.tasks.insert(next.id, next.clone());
        info!(
            "Completed '{}': +{} coins, +{} growth (streak {})",
            next.name, report.reward.coins, report.reward.growth, report.streak
        );
        outbox.completed = Some(TaskCompleted {
            task_id: next.id,
            task_type: next.task_type,
            difficulty: next.difficulty(),
        });
        outbox.changes.merge(changes);
        Ok(report)
    }

    /// Runs inside the completion transaction
    fn apply_completion(&self, task: &mut Task, completed_of_type: u32) -> Result<(CompletionReport, LedgerChanges)> {
        let username = self.ledger.username()?;
        let now = Utc::now();
        let multiplier = self.inventory.double_exp_multiplier_at(&username, now)?;
        let boost = self.store.reward_boost(&username, now)?.unwrap_or(1.0);
        let mut reward = task.reward();
        if multiplier > 1.0 {
            reward.growth = scale(reward.growth, multiplier);
        }
        if boost > 1.0 {
            reward.coins = scale(reward.coins, boost);
            reward.growth = scale(reward.growth, boost);
        }

        let mut changes = self.ledger.apply_task_reward(
            reward.growth,
            reward.coins,
            &reward.attributes,
            task.task_type.category(),
        )?;
        let mut credits = 0;
        if task.task_type == TaskType::Weekly && (task.bonus_streak() + 1) % WEEKLY_STREAK_CYCLE == 0 {
            changes.merge(self.ledger.unlock_achievement_credit()?);
            credits += 1;
        }

        task.mark_completed();
        self.store.update_task(task)?;

        if (completed_of_type + 1) % TYPE_COMPLETION_MILESTONE == 0 {
            changes.merge(self.ledger.unlock_achievement_credit()?);
            credits += 1;
        }

        let report = CompletionReport {
            task_id: task.id,
            reward,
            growth_multiplier: multiplier,
            reward_boost: boost,
            achievement_credits: credits,
            streak: task.bonus_streak(),
        };
        Ok((report, changes))
    }

    fn flush(&self, outbox: Outbox) -> Result<()> {
        self.ledger.announce(&outbox.changes)?;
        if let Some(event) = outbox.progressed {
            self.bus.publish(&event)?;
        }
        if let Some(event) = outbox.completed {
            self.bus.publish(&event)?;
        }
        Ok(())
    }

    /// A forgiving failure on a task without coupons falls back to a live
    /// forgiveness effect token, when the session holds one. Hard failures
    /// count against the session user.
    pub fn record_failure(&self, id: i64, use_forgiveness: bool) -> Result<FailureOutcome> {
        let mut cache = self.cache()?;
        let mut next = self.lookup(&cache, id)?;

        if use_forgiveness && next.forgiveness_coupons == 0 {
            if let Ok(username) = self.ledger.username() {
                if self.inventory.consume_effect_token(&username, PropEffect::ForgivenessCoupon)? {
                    info!("Forgiveness effect absorbed the failure of '{}'", next.name);
                    return Ok(FailureOutcome::Forgiven);
                }
            }
        }

        let outcome = next.record_failure(use_forgiveness);
        let counted = outcome == FailureOutcome::StreakReset && self.ledger.is_logged_in();
        self.ledger.atomically(|| {
            self.store.update_task(&next)?;
            if counted {
                let _ = self.ledger.record_task_failure()?;
            }
            Ok(())
        })?;
        info!("Task '{}' failed: {:?}", next.name, outcome);
        cache.tasks.insert(id, next);
        Ok(outcome)
    }

    pub fn reset_daily_tasks(&self) -> Result<ResetSummary> {
        self.reset_daily_tasks_at(Utc::now())
    }

    pub fn reset_daily_tasks_at(&self, now: DateTime<Utc>) -> Result<ResetSummary> {
        self.periodic_reset(TaskType::Daily, now)
    }

    pub fn reset_weekly_tasks(&self) -> Result<ResetSummary> {
        self.reset_weekly_tasks_at(Utc::now())
    }

    /// Calendar gating (Mondays) belongs to the caller's schedule
    pub fn reset_weekly_tasks_at(&self, now: DateTime<Utc>) -> Result<ResetSummary> {
        self.periodic_reset(TaskType::Weekly, now)
    }

    fn periodic_reset(&self, task_type: TaskType, now: DateTime<Utc>) -> Result<ResetSummary> {
        let mut cache = self.cache()?;
        let mut summary = ResetSummary {
            task_type,
            reset: 0,
            streaks_kept: false,
            deadlines_failed: 0,
        };
        let next = self.ledger.atomically(|| {
            let mut next = self.load_fresh()?;
            let pending = task_type == TaskType::Daily
                && next.values().any(|t| t.task_type == task_type && !t.completed);
            if pending {
                if let Some(holder) = self.rest_day_holder(now)? {
                    summary.streaks_kept = self.inventory.consume_effect_token_at(&holder, PropEffect::RestDay, now)?;
                }
            }
            for task in next.values_mut().filter(|t| t.task_type == task_type) {
                task.apply_periodic_reset(summary.streaks_kept);
                self.store.update_task(task)?;
                summary.reset += 1;
            }
            summary.deadlines_failed = self.fail_overdue_semester(&mut next, now)?;
            Ok(next)
        })?;

        cache.tasks = next;
        info!(
            "{} reset: {} tasks, {} overdue semester tasks failed{}",
            task_type,
            summary.reset,
            summary.deadlines_failed,
            if summary.streaks_kept { ", streaks kept by rest day" } else { "" }
        );
        Ok(summary)
    }

    /// The session user's rest day first, then any stored holder
    fn rest_day_holder(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        if let Ok(username) = self.ledger.username() {
            if self.inventory.has_effect_token_at(&username, PropEffect::RestDay, now)? {
                return Ok(Some(username));
            }
        }
        self.inventory.find_token_holder_at(PropEffect::RestDay, now)
    }

    /// Hard-fail every incomplete Semester task past its deadline
    pub fn enforce_semester_deadlines(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut cache = self.cache()?;
        let (next, failed) = self.ledger.atomically(|| {
            let mut next = self.load_fresh()?;
            let failed = self.fail_overdue_semester(&mut next, now)?;
            Ok((next, failed))
        })?;
        cache.tasks = next;
        Ok(failed)
    }

    fn fail_overdue_semester(&self, tasks: &mut BTreeMap<i64, Task>, now: DateTime<Utc>) -> Result<usize> {
        let mut failed = 0;
        for task in tasks
            .values_mut()
            .filter(|t| t.task_type == TaskType::Semester && t.is_overdue(now))
        {
            let before = task.clone();
            task.hard_fail();
            if *task != before {
                self.store.update_task(task)?;
                failed += 1;
                info!("Semester task '{}' missed its deadline", task.name);
            }
        }
        Ok(failed)
    }
}

fn scale(value: i64, factor: f64) -> i64 {
    (value as f64 * factor).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quest_common::events::LevelChanged;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct Fixture {
        tasks: TaskManager,
        ledger: Arc<Ledger>,
        inventory: Arc<Inventory>,
        bus: Arc<EventBus>,
        store: Arc<Store>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("tasks.db")).unwrap());
        let bus = Arc::new(EventBus::new());
        let ledger = Arc::new(Ledger::new(Arc::clone(&store), Arc::clone(&bus)));
        ledger.create_account("ana", "pw").unwrap();
        ledger.login("ana", "pw").unwrap();
        let inventory = Arc::new(Inventory::new(Arc::clone(&store), 1440));
        let tasks = TaskManager::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&inventory),
            Arc::clone(&bus),
        )
        .unwrap();
        Fixture {
            tasks,
            ledger,
            inventory,
            bus,
            store,
            _dir: dir,
        }
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::days(30)
    }

    #[test]
    fn test_daily_completion_pays_scenario_rewards() {
        let f = fixture();
        let task = f
            .tasks
            .create_task(Task::new("Read", TaskType::Daily, 3, later()).with_rewards(100, 50))
            .unwrap();

        let report = f.tasks.complete_task(task.id).unwrap().unwrap();
        assert_eq!(report.reward.coins, 130);
        assert_eq!(report.reward.growth, 65);
        assert_eq!(report.streak, 1);

        let user = f.ledger.current().unwrap();
        assert_eq!(user.coins(), 130);
        assert_eq!(user.growth_points(), 65);
        assert_eq!(user.attributes().execution, 1);

        assert!(f.tasks.complete_task(task.id).unwrap().is_none());
        assert_eq!(f.ledger.current().unwrap().coins(), 130);
    }

    #[test]
    fn test_weekly_fourth_streak_earns_credit() {
        let f = fixture();
        let task = f
            .tasks
            .create_task(
                Task::new("Plan", TaskType::Weekly, 2, later())
                    .with_rewards(100, 100)
                    .with_streak(3),
            )
            .unwrap();

        let report = f.tasks.complete_task(task.id).unwrap().unwrap();
        assert_eq!(report.reward.coins, 144);
        assert_eq!(report.streak, 4);
        assert_eq!(report.achievement_credits, 1);
        assert_eq!(f.ledger.current().unwrap().progress.achievements_unlocked, 1);
    }

    #[test]
    fn test_progress_clamps_and_completes() {
        let f = fixture();
        let task = f
            .tasks
            .create_task(Task::new("Laps", TaskType::Custom, 1, later()).with_rewards(10, 10).with_goal(5))
            .unwrap();

        let update = f.tasks.update_progress(task.id, -3).unwrap();
        assert_eq!(update.task.progress_value(), 0);
        assert!(update.completion.is_none());

        let update = f.tasks.update_progress(task.id, 9).unwrap();
        assert_eq!(update.task.progress_value(), 5);
        assert!(update.task.completed);
        assert!(update.completion.is_some());
        assert_eq!(f.store.find_task(task.id).unwrap().unwrap().progress_value(), 5);
    }

    #[test]
    fn test_completion_without_session_leaves_task_pending() {
        let f = fixture();
        let task = f
            .tasks
            .create_task(Task::new("Read", TaskType::Daily, 1, later()).with_rewards(10, 10))
            .unwrap();
        f.ledger.logout().unwrap();

        assert!(matches!(f.tasks.complete_task(task.id), Err(QuestError::NoActiveSession)));
        assert!(!f.tasks.task(task.id).unwrap().completed);
        assert!(!f.store.find_task(task.id).unwrap().unwrap().completed);
    }

    #[test]
    fn test_failure_with_and_without_coupon() {
        let f = fixture();
        let mut task = Task::new("Gym", TaskType::Daily, 2, later()).with_streak(3);
        task.forgiveness_coupons = 1;
        let task = f.tasks.create_task(task).unwrap();

        assert_eq!(f.tasks.record_failure(task.id, true).unwrap(), FailureOutcome::Forgiven);
        assert_eq!(f.tasks.task(task.id).unwrap().bonus_streak(), 3);

        assert_eq!(f.tasks.record_failure(task.id, true).unwrap(), FailureOutcome::StreakReset);
        assert_eq!(f.tasks.task(task.id).unwrap().bonus_streak(), 0);
    }

    #[test]
    fn test_forgiveness_effect_token_covers_failure() {
        let f = fixture();
        let task = f
            .tasks
            .create_task(Task::new("Gym", TaskType::Daily, 2, later()).with_streak(2))
            .unwrap();
        f.inventory.register_effect("ana", PropEffect::ForgivenessCoupon, 60, 1).unwrap();

        assert_eq!(f.tasks.record_failure(task.id, true).unwrap(), FailureOutcome::Forgiven);
        assert_eq!(f.tasks.task(task.id).unwrap().bonus_streak(), 2);
        assert!(!f.inventory.has_effect_token("ana", PropEffect::ForgivenessCoupon).unwrap());
    }

    #[test]
    fn test_double_growth_card_scales_growth_only() {
        let f = fixture();
        let task = f
            .tasks
            .create_task(Task::new("Read", TaskType::Daily, 3, later()).with_rewards(100, 50))
            .unwrap();
        f.inventory.register_effect("ana", PropEffect::DoubleExpCard, 60, 1).unwrap();

        let report = f.tasks.complete_task(task.id).unwrap().unwrap();
        assert_eq!(report.growth_multiplier, 2.0);
        assert_eq!(report.reward_boost, 1.0);
        assert_eq!(report.reward.growth, 130);
        assert_eq!(report.reward.coins, 130);
    }

    #[test]
    fn test_daily_reset_and_rest_day() {
        let f = fixture();
        let done = f
            .tasks
            .create_task(Task::new("Done", TaskType::Daily, 1, later()).with_rewards(10, 10))
            .unwrap();
        let open = f
            .tasks
            .create_task(Task::new("Open", TaskType::Daily, 1, later()).with_streak(5))
            .unwrap();
        f.tasks.complete_task(done.id).unwrap();

        let now = Utc::now();
        f.inventory.register_effect_at("ana", PropEffect::RestDay, 60, 1, now).unwrap();
        let summary = f.tasks.reset_daily_tasks_at(now).unwrap();
        assert!(summary.streaks_kept);
        assert_eq!(summary.reset, 2);
        assert_eq!(f.tasks.task(open.id).unwrap().bonus_streak(), 5);
        assert_eq!(f.tasks.task(done.id).unwrap().bonus_streak(), 1);
        assert!(!f.tasks.task(done.id).unwrap().completed);

        let summary = f.tasks.reset_daily_tasks_at(now).unwrap();
        assert!(!summary.streaks_kept);
        assert_eq!(f.tasks.task(open.id).unwrap().bonus_streak(), 0);
    }

    #[test]
    fn test_rest_day_of_logged_out_holder() {
        let f = fixture();
        let open = f
            .tasks
            .create_task(Task::new("Open", TaskType::Daily, 1, later()).with_streak(4))
            .unwrap();
        let now = Utc::now();
        f.inventory.register_effect_at("ana", PropEffect::RestDay, 60, 1, now).unwrap();
        f.ledger.logout().unwrap();

        let summary = f.tasks.reset_daily_tasks_at(now).unwrap();
        assert!(summary.streaks_kept);
        assert_eq!(f.tasks.task(open.id).unwrap().bonus_streak(), 4);
        assert!(!f.inventory.has_effect_token_at("ana", PropEffect::RestDay, now).unwrap());
    }

    #[test]
    fn test_reset_reads_tasks_written_elsewhere() {
        let f = fixture();
        let other_store = Arc::new(Store::open(&f._dir.path().join("tasks.db")).unwrap());
        let other_bus = Arc::new(EventBus::new());
        let other_ledger = Arc::new(Ledger::new(Arc::clone(&other_store), Arc::clone(&other_bus)));
        other_ledger.login("ana", "pw").unwrap();
        let other = TaskManager::new(
            Arc::clone(&other_store),
            Arc::clone(&other_ledger),
            Arc::new(Inventory::new(Arc::clone(&other_store), 1440)),
            other_bus,
        )
        .unwrap();

        let task = other
            .create_task(Task::new("Stretch", TaskType::Daily, 1, later()).with_rewards(10, 10))
            .unwrap();
        other.complete_task(task.id).unwrap();
        assert!(matches!(f.tasks.task(task.id), Err(QuestError::NotFound(_))));

        let summary = f.tasks.reset_daily_tasks_at(Utc::now()).unwrap();
        assert_eq!(summary.reset, 1);
        assert!(!f.tasks.task(task.id).unwrap().completed);
        assert!(!f.store.find_task(task.id).unwrap().unwrap().completed);
        assert_eq!(f.tasks.task(task.id).unwrap().bonus_streak(), 1);
    }

    #[test]
    fn test_hard_failures_are_counted() {
        let f = fixture();
        let mut task = Task::new("Gym", TaskType::Daily, 2, later());
        task.forgiveness_coupons = 1;
        let task = f.tasks.create_task(task).unwrap();

        f.tasks.record_failure(task.id, true).unwrap();
        assert_eq!(f.ledger.current().unwrap().progress.total_tasks_failed, 0);
        f.tasks.record_failure(task.id, false).unwrap();
        f.ledger.reload().unwrap();
        assert_eq!(f.ledger.current().unwrap().progress.total_tasks_failed, 1);
    }

    #[test]
    fn test_check_in_buff_boosts_coins_and_growth() {
        let f = fixture();
        let task = f
            .tasks
            .create_task(Task::new("Read", TaskType::Daily, 3, later()).with_rewards(100, 50))
            .unwrap();
        let now = Utc::now();
        let mut buff = quest_common::SerendipityOutcome::calm();
        buff.kind = quest_common::SerendipityKind::RewardBuff;
        buff.reward_multiplier = 1.2;
        buff.buff_until = Some(now + Duration::hours(12));
        f.store.insert_serendipity_roll("ana", "2026-03-02", &buff, now).unwrap();

        let report = f.tasks.complete_task(task.id).unwrap().unwrap();
        assert_eq!(report.reward_boost, 1.2);
        assert_eq!(report.reward.coins, 156);
        assert_eq!(report.reward.growth, 78);
        assert_eq!(f.ledger.current().unwrap().coins(), 156);
    }

    #[test]
    fn test_reset_fails_overdue_semester_tasks() {
        let f = fixture();
        let past = Utc::now() - Duration::days(1);
        let thesis = f
            .tasks
            .create_task(Task::new("Thesis", TaskType::Semester, 5, past).with_streak(2).with_goal(4))
            .unwrap();
        f.tasks.update_progress(thesis.id, 2).unwrap();

        let summary = f.tasks.reset_weekly_tasks().unwrap();
        assert_eq!(summary.deadlines_failed, 1);
        let thesis = f.tasks.task(thesis.id).unwrap();
        assert_eq!(thesis.bonus_streak(), 0);
        assert_eq!(thesis.progress_value(), 0);

        assert_eq!(f.tasks.enforce_semester_deadlines(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_events_follow_commit() {
        let f = fixture();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        f.bus.subscribe(move |e: &TaskCompleted| {
            log.lock().unwrap().push(format!("completed:{}", e.task_id));
            Ok(())
        });
        let log = Arc::clone(&seen);
        f.bus.subscribe(move |e: &LevelChanged| {
            log.lock().unwrap().push(format!("level:{}", e.level));
            Ok(())
        });
        let task = f
            .tasks
            .create_task(Task::new("Big", TaskType::Custom, 1, later()).with_rewards(0, 400))
            .unwrap();
        f.tasks.complete_task(task.id).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["level:3".to_string(), format!("completed:{}", task.id)]
        );
    }

    #[test]
    fn test_crud_and_statistics() {
        let f = fixture();
        assert!(matches!(
            f.tasks.create_task(Task::new("  ", TaskType::Daily, 1, later())),
            Err(QuestError::Validation(_))
        ));
        let mut task = f.tasks.create_task(Task::new("Walk", TaskType::Custom, 1, later())).unwrap();
        task.description = "around the lake".into();
        f.tasks.update_task(task.clone()).unwrap();
        assert_eq!(f.tasks.tasks_by_type(TaskType::Custom).unwrap().len(), 1);

        f.tasks.complete_task(task.id).unwrap();
        let stats = f.tasks.statistics().unwrap();
        assert_eq!(stats[3], (TaskType::Custom, 1));

        f.tasks.remove_task(task.id).unwrap();
        assert!(matches!(f.tasks.task(task.id), Err(QuestError::NotFound(_))));
        assert!(matches!(f.tasks.remove_task(task.id), Err(QuestError::NotFound(_))));
    }
}
