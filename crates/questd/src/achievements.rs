//! Achievement tracker.
//!
//! Listens to task and ledger events, feeds the matching conditions of every
//! achievement owned by the session user, and unlocks each achievement at
//! most once. A reward-bearing unlock can move level, pride or coins; those
//! new values are fed back through the same pass so one unlock can cascade
//! into the next before anything is published.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use quest_common::achievement::{MONTHLY_REWARD_ACHIEVEMENT_CAP, TASK_PROGRESS_TAG};
use quest_common::events::{
    AchievementProgressChanged, AchievementUnlocked, CoinsChanged, Event, LevelChanged,
    PrideChanged, SubscriptionId, TaskCompleted, TaskProgressed,
};
use quest_common::{Achievement, AchievementKind, ConditionType, EventBus, QuestError, Result};

use crate::catalog;
use crate::ledger::{Ledger, LedgerChanges};
use crate::store::Store;

#[derive(Debug, Clone)]
enum Update {
    Increment {
        condition: ConditionType,
        metadata: String,
        delta: i64,
    },
    Replace {
        condition: ConditionType,
        metadata: String,
        value: i64,
    },
}

impl Update {
    fn increment(condition: ConditionType, metadata: &str, delta: i64) -> Self {
        Update::Increment {
            condition,
            metadata: metadata.to_string(),
            delta,
        }
    }

    fn replace(condition: ConditionType, metadata: &str, value: i64) -> Self {
        Update::Replace {
            condition,
            metadata: metadata.to_string(),
            value,
        }
    }

    fn apply(&self, achievement: &mut Achievement) -> bool {
        match self {
            Update::Increment {
                condition,
                metadata,
                delta,
            } => achievement.apply_increment(*condition, metadata, *delta),
            Update::Replace {
                condition,
                metadata,
                value,
            } => achievement.apply_absolute(*condition, metadata, *value),
        }
    }
}

/// Updates applied together; `target` limits them to one achievement
struct Batch {
    target: Option<i64>,
    updates: Vec<Update>,
}

impl Batch {
    fn all(updates: Vec<Update>) -> Self {
        Self { target: None, updates }
    }

    /// Ledger values that moved, as absolute condition updates
    fn from_changes(changes: &LedgerChanges) -> Option<Self> {
        let mut updates = Vec::new();
        if let Some(level) = changes.level {
            updates.push(Update::replace(ConditionType::ReachLevel, "", level as i64));
        }
        if let Some(pride) = changes.pride {
            updates.push(Update::replace(ConditionType::ReachPride, "", pride as i64));
        }
        if let Some(coins) = changes.coins {
            updates.push(Update::replace(ConditionType::ReachCoins, "", coins));
        }
        (!updates.is_empty()).then(|| Self::all(updates))
    }
}

#[derive(Default)]
struct Outbox {
    progress: Vec<AchievementProgressChanged>,
    unlocked: Vec<AchievementUnlocked>,
    changes: LedgerChanges,
}

#[derive(Default)]
struct TrackerState {
    owner: Option<String>,
    achievements: BTreeMap<i64, Achievement>,
    gallery: BTreeMap<String, Vec<i64>>,
}

impl TrackerState {
    fn rebuild_gallery(&mut self) {
        self.gallery.clear();
        for achievement in self.achievements.values() {
            if achievement.gallery_group.is_empty() {
                continue;
            }
            self.gallery
                .entry(achievement.gallery_group.clone())
                .or_default()
                .push(achievement.id);
        }
    }
}

pub struct AchievementTracker {
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    bus: Arc<EventBus>,
    state: Mutex<TrackerState>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl AchievementTracker {
    pub fn new(store: Arc<Store>, ledger: Arc<Ledger>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            ledger,
            bus,
            state: Mutex::new(TrackerState::default()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, TrackerState>> {
        self.state
            .lock()
            .map_err(|_| QuestError::Persistence("achievement lock poisoned".into()))
    }

    /// Subscribe to task and ledger events. Handlers hold only a weak handle.
    pub fn attach(self: &Arc<Self>) {
        let ids = vec![
            self.relay(|t: &Self, e: &TaskCompleted| t.on_task_completed(e)),
            self.relay(|t: &Self, e: &TaskProgressed| t.on_task_progressed(e)),
            self.relay(|t: &Self, e: &LevelChanged| {
                t.run(Batch::all(vec![Update::replace(ConditionType::ReachLevel, "", e.level as i64)]))
            }),
            self.relay(|t: &Self, e: &PrideChanged| {
                t.run(Batch::all(vec![Update::replace(ConditionType::ReachPride, "", e.pride as i64)]))
            }),
            self.relay(|t: &Self, e: &CoinsChanged| {
                t.run(Batch::all(vec![Update::replace(ConditionType::ReachCoins, "", e.coins)]))
            }),
        ];
        match self.subscriptions.lock() {
            Ok(mut subs) => subs.extend(ids),
            Err(_) => warn!("achievement subscriptions lock poisoned"),
        }
    }

    fn relay<E, F>(self: &Arc<Self>, handler: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&Self, &E) -> Result<()> + Send + Sync + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.bus.subscribe(move |event: &E| match weak.upgrade() {
            Some(tracker) => handler(&*tracker, event),
            None => Ok(()),
        })
    }

    pub fn detach(&self) {
        if let Ok(mut subs) = self.subscriptions.lock() {
            for id in subs.drain(..) {
                self.bus.unsubscribe(id);
            }
        }
    }

    /// Load the session user's achievements and seed the system catalog
    pub fn activate(&self) -> Result<usize> {
        let user = self.ledger.current()?;
        let owner = user.username.clone();
        let mut achievements: BTreeMap<i64, Achievement> = self
            .store
            .load_achievements(&owner)?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut seeded = 0;
        self.ledger.atomically(|| {
            for mut template in catalog::system_achievements(&owner) {
                if self
                    .store
                    .find_achievement_id(&owner, &template.name, AchievementKind::System)?
                    .is_some()
                {
                    continue;
                }
                template.id = self.store.insert_achievement(&template)?;
                achievements.insert(template.id, template);
                seeded += 1;
            }
            Ok(())
        })?;

        {
            let mut state = self.state()?;
            state.owner = Some(owner.clone());
            state.achievements = achievements;
            state.rebuild_gallery();
            info!(
                "Tracking {} achievements for '{}' ({} seeded)",
                state.achievements.len(),
                owner,
                seeded
            );
        }

        // Bring level, pride and coin conditions up to date
        self.run(Batch::all(vec![
            Update::replace(ConditionType::ReachLevel, "", user.level() as i64),
            Update::replace(ConditionType::ReachPride, "", user.pride() as i64),
            Update::replace(ConditionType::ReachCoins, "", user.coins()),
        ]))?;
        Ok(seeded)
    }

    pub fn deactivate(&self) -> Result<()> {
        let mut state = self.state()?;
        *state = TrackerState::default();
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state().map(|s| s.owner.is_some()).unwrap_or(false)
    }

    fn on_task_completed(&self, event: &TaskCompleted) -> Result<()> {
        self.run(Batch::all(vec![
            Update::increment(ConditionType::CompleteAnyTask, "", 1),
            Update::increment(ConditionType::CompleteTaskType, event.task_type.as_str(), 1),
        ]))
    }

    fn on_task_progressed(&self, event: &TaskProgressed) -> Result<()> {
        if event.goal <= 0 {
            return Ok(());
        }
        let value = event.value.clamp(0, event.goal);
        self.run(Batch::all(vec![Update::replace(
            ConditionType::CustomCounter,
            TASK_PROGRESS_TAG,
            value,
        )]))
    }

    /// One condition-update pass under a single transaction, then publish
    fn run(&self, batch: Batch) -> Result<()> {
        let mut state = self.state()?;
        if state.owner.is_none() {
            return Ok(());
        }
        let mut working = state.achievements.clone();
        let mut outbox = Outbox::default();
        let now = Utc::now();
        self.ledger
            .atomically(|| self.run_pass(&mut working, batch, now, &mut outbox))?;
        state.achievements = working;
        drop(state);

        for event in &outbox.progress {
            self.bus.publish(event)?;
        }
        for event in &outbox.unlocked {
            self.bus.publish(event)?;
        }
        self.ledger.announce(&outbox.changes)
    }

    fn run_pass(
        &self,
        achievements: &mut BTreeMap<i64, Achievement>,
        first: Batch,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let mut queue = VecDeque::from([first]);
        while let Some(batch) = queue.pop_front() {
            for achievement in achievements.values_mut() {
                if batch.target.is_some_and(|id| id != achievement.id) {
                    continue;
                }
                let mut changed = false;
                for update in &batch.updates {
                    changed |= update.apply(achievement);
                }
                if changed {
                    self.store.update_achievement(achievement)?;
                    debug!(
                        "'{}' progress {}/{}",
                        achievement.name,
                        achievement.progress_value(),
                        achievement.progress_goal()
                    );
                    outbox.progress.push(AchievementProgressChanged {
                        achievement_id: achievement.id,
                        value: achievement.progress_value(),
                        goal: achievement.progress_goal(),
                    });
                }
                if !achievement.mark_unlocked(now) {
                    continue;
                }

                let changes = if achievement.has_reward() {
                    self.ledger
                        .apply_achievement_reward(achievement.reward_coins, &achievement.reward_attributes)?
                } else {
                    self.ledger.unlock_achievement_credit()?
                };
                self.store.update_achievement(achievement)?;
                info!("Unlocked achievement '{}'", achievement.name);
                outbox.unlocked.push(AchievementUnlocked {
                    achievement_id: achievement.id,
                    name: achievement.name.clone(),
                });
                if let Some(cascade) = Batch::from_changes(&changes) {
                    queue.push_back(cascade);
                }
                outbox.changes.merge(changes);
            }
        }
        Ok(())
    }

    pub fn create_custom(&self, achievement: Achievement) -> Result<Achievement> {
        self.create_custom_at(achievement, Utc::now())
    }

    /// Owner, creator, kind and creation time are taken from the session
    pub fn create_custom_at(&self, mut achievement: Achievement, now: DateTime<Utc>) -> Result<Achievement> {
        let owner = self.ledger.username()?;
        achievement.owner = owner.clone();
        achievement.creator = owner.clone();
        achievement.kind = AchievementKind::Custom;
        achievement.created_at = now;
        achievement.restore_unlock(false, None);
        achievement.recalculate_progress();
        achievement.validate_custom()?;

        let mut state = self.state()?;
        if achievement.has_reward() {
            self.check_reward_quota(&owner, now)?;
        }
        achievement.id = self.store.insert_achievement(&achievement)?;
        info!("Created custom achievement '{}' (id {})", achievement.name, achievement.id);
        if state.owner.as_deref() == Some(owner.as_str()) {
            state.achievements.insert(achievement.id, achievement.clone());
            state.rebuild_gallery();
        }
        Ok(achievement)
    }

    fn check_reward_quota(&self, owner: &str, month_of: DateTime<Utc>) -> Result<()> {
        let month = month_of.format("%Y-%m").to_string();
        let used = self.store.count_reward_customs_in_month(owner, &month)?;
        if used >= MONTHLY_REWARD_ACHIEVEMENT_CAP {
            return Err(QuestError::QuotaExceeded(format!(
                "{} reward-bearing custom achievements already created in {}",
                used, month
            )));
        }
        Ok(())
    }

    /// Unlock state, owner and creation time stay with the stored achievement
    pub fn update_custom(&self, achievement: Achievement) -> Result<()> {
        let mut state = self.state()?;
        let existing = state
            .achievements
            .get(&achievement.id)
            .ok_or_else(|| QuestError::not_found("achievement", achievement.id))?;
        if existing.kind == AchievementKind::System {
            return Err(QuestError::validation("system achievements cannot be modified"));
        }

        let mut next = achievement;
        next.owner = existing.owner.clone();
        next.creator = existing.creator.clone();
        next.kind = AchievementKind::Custom;
        next.created_at = existing.created_at;
        next.restore_unlock(existing.is_unlocked(), existing.completion_time());
        next.recalculate_progress();
        next.validate_custom()?;
        if next.has_reward() && !existing.has_reward() {
            self.check_reward_quota(&next.owner, next.created_at)?;
        }

        self.store.update_achievement(&next)?;
        state.achievements.insert(next.id, next);
        state.rebuild_gallery();
        Ok(())
    }

    pub fn delete_custom(&self, id: i64) -> Result<()> {
        let mut state = self.state()?;
        let existing = state
            .achievements
            .get(&id)
            .ok_or_else(|| QuestError::not_found("achievement", id))?;
        if existing.kind == AchievementKind::System {
            return Err(QuestError::validation("system achievements cannot be deleted"));
        }
        self.store.delete_achievement(id)?;
        state.achievements.remove(&id);
        state.rebuild_gallery();
        info!("Deleted custom achievement {}", id);
        Ok(())
    }

    /// Feeds the achievement's custom counters by `delta`
    pub fn record_custom_progress(&self, id: i64, delta: i64) -> Result<Achievement> {
        if !self.state()?.achievements.contains_key(&id) {
            return Err(QuestError::not_found("achievement", id));
        }
        self.run(Batch {
            target: Some(id),
            updates: vec![Update::increment(ConditionType::CustomCounter, "", delta)],
        })?;
        self.achievement(id)
    }

    pub fn achievements(&self) -> Result<Vec<Achievement>> {
        Ok(self.state()?.achievements.values().cloned().collect())
    }

    pub fn achievement(&self, id: i64) -> Result<Achievement> {
        self.state()?
            .achievements
            .get(&id)
            .cloned()
            .ok_or_else(|| QuestError::not_found("achievement", id))
    }

    pub fn achievements_in_group(&self, group: &str) -> Result<Vec<Achievement>> {
        let state = self.state()?;
        Ok(state
            .gallery
            .get(group)
            .map(|ids| ids.iter().filter_map(|id| state.achievements.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    pub fn gallery_groups(&self) -> Result<Vec<String>> {
        Ok(self.state()?.gallery.keys().cloned().collect())
    }
}

impl Drop for AchievementTracker {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quest_common::{Condition, RewardType, TaskType};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct Fixture {
        tracker: Arc<AchievementTracker>,
        ledger: Arc<Ledger>,
        bus: Arc<EventBus>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("achievements.db")).unwrap());
        let bus = Arc::new(EventBus::new());
        let ledger = Arc::new(Ledger::new(Arc::clone(&store), Arc::clone(&bus)));
        ledger.create_account("ana", "pw").unwrap();
        ledger.login("ana", "pw").unwrap();
        let tracker = Arc::new(AchievementTracker::new(store, Arc::clone(&ledger), Arc::clone(&bus)));
        tracker.attach();
        tracker.activate().unwrap();
        Fixture {
            tracker,
            ledger,
            bus,
            _dir: dir,
        }
    }

    fn custom(name: &str, reward: RewardType, conditions: Vec<Condition>) -> Achievement {
        Achievement::new("", name, AchievementKind::Custom, reward, conditions)
    }

    fn by_name(tracker: &AchievementTracker, name: &str) -> Achievement {
        tracker
            .achievements()
            .unwrap()
            .into_iter()
            .find(|a| a.name == name)
            .unwrap()
    }

    #[test]
    fn test_seeding_is_idempotent() {
        let f = fixture();
        assert_eq!(f.tracker.achievements().unwrap().len(), 4);
        assert_eq!(f.tracker.activate().unwrap(), 0);
        assert_eq!(f.tracker.achievements().unwrap().len(), 4);
        assert_eq!(f.tracker.achievements_in_group("Practice").unwrap().len(), 2);
        assert_eq!(f.tracker.gallery_groups().unwrap().len(), 3);
    }

    #[test]
    fn test_two_condition_unlock_happens_once() {
        let f = fixture();
        let star = f
            .tracker
            .create_custom(custom(
                "Rising Star",
                RewardType::NoReward,
                vec![
                    Condition::new(ConditionType::ReachLevel, 3),
                    Condition::new(ConditionType::ReachPride, 20),
                ],
            ))
            .unwrap();

        // Campus Newcomer unlocks on level 3 as well and pays 2 pride
        f.bus.publish(&LevelChanged { level: 3 }).unwrap();
        let after_level = f.tracker.achievement(star.id).unwrap();
        assert_eq!(after_level.progress_value(), 5);
        assert_eq!(after_level.progress_goal(), 23);
        assert!(!after_level.is_unlocked());
        assert!(by_name(&f.tracker, "Campus Newcomer").is_unlocked());

        f.bus.publish(&PrideChanged { pride: 20 }).unwrap();
        assert!(f.tracker.achievement(star.id).unwrap().is_unlocked());
        let credits = f.ledger.current().unwrap().progress.achievements_unlocked;

        f.bus.publish(&PrideChanged { pride: 25 }).unwrap();
        assert_eq!(f.ledger.current().unwrap().progress.achievements_unlocked, credits);
    }

    #[test]
    fn test_task_events_feed_catalog() {
        let f = fixture();
        for _ in 0..5 {
            f.bus
                .publish(&TaskCompleted {
                    task_id: 1,
                    task_type: TaskType::Weekly,
                    difficulty: 2,
                })
                .unwrap();
        }
        let weekly = by_name(&f.tracker, "Weekly Planner");
        assert!(weekly.is_unlocked());
        assert_eq!(by_name(&f.tracker, "Task Hunter").progress_value(), 5);

        let user = f.ledger.current().unwrap();
        assert_eq!(user.coins(), 40);
        assert_eq!(user.attributes().pride, 1);
        assert_eq!(user.attributes().execution, 1);
    }

    #[test]
    fn test_reward_cascades_into_next_unlock() {
        let f = fixture();
        // pays exactly the 50 coins the second one waits for
        let first = f
            .tracker
            .create_custom({
                let mut a = custom(
                    "Step One",
                    RewardType::WithReward,
                    vec![Condition::new(ConditionType::CustomCounter, 1)],
                );
                a.reward_coins = 50;
                a
            })
            .unwrap();
        let second = f
            .tracker
            .create_custom(custom(
                "Step Two",
                RewardType::NoReward,
                vec![Condition::new(ConditionType::ReachCoins, 50)],
            ))
            .unwrap();

        let unlocked = Arc::new(StdMutex::new(Vec::new()));
        let log = Arc::clone(&unlocked);
        f.bus.subscribe(move |e: &AchievementUnlocked| {
            log.lock().unwrap().push(e.name.clone());
            Ok(())
        });

        f.tracker.record_custom_progress(first.id, 1).unwrap();
        assert!(f.tracker.achievement(second.id).unwrap().is_unlocked());
        assert_eq!(*unlocked.lock().unwrap(), vec!["Step One", "Step Two"]);
        assert_eq!(f.ledger.current().unwrap().progress.achievements_unlocked, 2);
    }

    #[test]
    fn test_monthly_quota() {
        let f = fixture();
        let march = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let rewarded = || {
            let mut a = custom(
                "Paid",
                RewardType::WithReward,
                vec![Condition::new(ConditionType::CustomCounter, 3)],
            );
            a.reward_coins = 10;
            a
        };
        f.tracker.create_custom_at(rewarded(), march).unwrap();
        f.tracker.create_custom_at(rewarded(), march).unwrap();
        assert!(matches!(
            f.tracker.create_custom_at(rewarded(), march),
            Err(QuestError::QuotaExceeded(_))
        ));
        let free = custom("Free", RewardType::NoReward, vec![Condition::new(ConditionType::CustomCounter, 1)]);
        assert!(f.tracker.create_custom_at(free, march).is_ok());

        let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        assert!(f.tracker.create_custom_at(rewarded(), april).is_ok());
    }

    #[test]
    fn test_custom_validation_and_system_protection() {
        let f = fixture();
        assert!(matches!(
            f.tracker.create_custom(custom("Empty", RewardType::NoReward, vec![])),
            Err(QuestError::Validation(_))
        ));
        assert!(matches!(
            f.tracker.create_custom(custom(
                "Zero",
                RewardType::NoReward,
                vec![Condition::new(ConditionType::CustomCounter, 0)]
            )),
            Err(QuestError::Validation(_))
        ));

        let system = by_name(&f.tracker, "Task Hunter");
        assert!(matches!(f.tracker.delete_custom(system.id), Err(QuestError::Validation(_))));
        assert!(matches!(f.tracker.update_custom(system), Err(QuestError::Validation(_))));
        assert!(matches!(f.tracker.delete_custom(9999), Err(QuestError::NotFound(_))));
        assert!(matches!(f.tracker.record_custom_progress(9999, 1), Err(QuestError::NotFound(_))));
    }

    #[test]
    fn test_update_and_delete_custom() {
        let f = fixture();
        let mut mine = f
            .tracker
            .create_custom(custom(
                "Reader",
                RewardType::NoReward,
                vec![Condition::new(ConditionType::CustomCounter, 4)],
            ))
            .unwrap();
        mine.gallery_group = "Books".into();
        mine.owner = "mallory".into();
        f.tracker.update_custom(mine.clone()).unwrap();

        let stored = f.tracker.achievement(mine.id).unwrap();
        assert_eq!(stored.owner, "ana");
        assert_eq!(f.tracker.achievements_in_group("Books").unwrap().len(), 1);

        f.tracker.delete_custom(mine.id).unwrap();
        assert!(f.tracker.achievements_in_group("Books").unwrap().is_empty());
    }

    #[test]
    fn test_task_progress_feeds_tagged_counter() {
        let f = fixture();
        let focus = f
            .tracker
            .create_custom(custom(
                "Focus",
                RewardType::NoReward,
                vec![Condition::new(ConditionType::CustomCounter, 5).tagged(TASK_PROGRESS_TAG)],
            ))
            .unwrap();
        f.bus.publish(&TaskProgressed { task_id: 1, value: 9, goal: 4 }).unwrap();
        assert_eq!(f.tracker.achievement(focus.id).unwrap().progress_value(), 4);
        f.bus.publish(&TaskProgressed { task_id: 1, value: 2, goal: 0 }).unwrap();
        assert_eq!(f.tracker.achievement(focus.id).unwrap().progress_value(), 4);
    }

    #[test]
    fn test_detach_stops_updates() {
        let f = fixture();
        f.tracker.detach();
        f.bus.publish(&LevelChanged { level: 3 }).unwrap();
        assert!(!by_name(&f.tracker, "Campus Newcomer").is_unlocked());
    }
}
