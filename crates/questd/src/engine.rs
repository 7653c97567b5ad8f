//! Engine facade: builds every manager once, wires the event bus, and
//! serialises commands and timer ticks through one command lock.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc, Weekday};
use serde::Serialize;
use tracing::info;

use quest_common::events::{
    AchievementUnlocked, ItemPurchased, LevelChanged, SerendipityTriggered, SubscriptionId, TaskCompleted,
};
use quest_common::{
    Achievement, ActiveEffect, AttributeSet, EventBus, FailureOutcome, GrowthSnapshot, InventoryItem,
    QuestConfig, QuestError, Result, SerendipityOutcome, ShopItem, Task, User,
};

use crate::achievements::AchievementTracker;
use crate::history::GrowthHistory;
use crate::inventory::{Inventory, InventoryStatistics};
use crate::journal::{Journal, JournalEntry};
use crate::ledger::Ledger;
use crate::scheduler::{Cadence, Scheduler};
use crate::serendipity::{CheckIn, Serendipity};
use crate::shop::{PurchaseOutcome, Shop};
use crate::store::Store;
use crate::tasks::{CompletionReport, ProgressUpdate, ResetSummary, TaskManager};

/// Read-only view for display surfaces
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub user: User,
    pub available_attribute_points: i64,
    pub tasks: Vec<Task>,
    pub achievements: Vec<Achievement>,
    pub inventory: Vec<InventoryItem>,
    pub inventory_statistics: InventoryStatistics,
    pub active_effects: Vec<ActiveEffect>,
    /// Today's check-in, if there was one
    pub check_in: Option<SerendipityOutcome>,
}

pub struct Engine {
    store: Arc<Store>,
    bus: Arc<EventBus>,
    ledger: Arc<Ledger>,
    inventory: Arc<Inventory>,
    tasks: Arc<TaskManager>,
    tracker: Arc<AchievementTracker>,
    shop: Shop,
    serendipity: Serendipity,
    history: GrowthHistory,
    journal: Option<Arc<Journal>>,
    journal_subscriptions: Vec<SubscriptionId>,
    sweep_interval: Duration,
    command_lock: Mutex<()>,
}

impl Engine {
    pub fn open(config: &QuestConfig) -> Result<Self> {
        let store = Arc::new(Store::open(&config.store.path)?);
        let journal = config
            .journal
            .enabled
            .then(|| Arc::new(Journal::new(&config.journal.path, config.journal.max_entries)));
        Self::assemble(store, config, journal)
    }

    /// In-memory store, no journal
    pub fn open_in_memory(config: &QuestConfig) -> Result<Self> {
        Self::assemble(Arc::new(Store::open_in_memory()?), config, None)
    }

    fn assemble(store: Arc<Store>, config: &QuestConfig, journal: Option<Arc<Journal>>) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let ledger = Arc::new(Ledger::new(Arc::clone(&store), Arc::clone(&bus)));
        let inventory = Arc::new(Inventory::new(
            Arc::clone(&store),
            config.effects.default_duration_minutes,
        ));
        let tasks = Arc::new(TaskManager::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&inventory),
            Arc::clone(&bus),
        )?);
        let tracker = Arc::new(AchievementTracker::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&bus),
        ));
        tracker.attach();
        let shop = Shop::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&inventory),
            Arc::clone(&bus),
            config.shop.effective_baseline(),
        );
        let serendipity = Serendipity::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&tasks),
            Arc::clone(&bus),
            config.serendipity.clone(),
        );
        let history = GrowthHistory::new(Arc::clone(&store), Arc::clone(&ledger), journal.clone());
        let journal_subscriptions = journal
            .as_ref()
            .map(|j| subscribe_journal(&bus, j))
            .unwrap_or_default();

        info!("Engine ready on {}", store.path().display());
        Ok(Self {
            store,
            bus,
            ledger,
            inventory,
            tasks,
            tracker,
            shop,
            serendipity,
            history,
            journal,
            journal_subscriptions,
            sweep_interval: Duration::minutes(config.scheduler.effective_sweep_interval() as i64),
            command_lock: Mutex::new(()),
        })
    }

    fn command(&self) -> Result<MutexGuard<'_, ()>> {
        self.command_lock
            .lock()
            .map_err(|_| QuestError::Persistence("command lock poisoned".into()))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn achievements(&self) -> &AchievementTracker {
        &self.tracker
    }

    pub fn shop(&self) -> &Shop {
        &self.shop
    }

    pub fn history(&self) -> &GrowthHistory {
        &self.history
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_deref()
    }

    // Session

    pub fn register(&self, username: &str, password: &str) -> Result<i64> {
        let _guard = self.command()?;
        self.ledger.create_account(username, password)
    }

    /// Logs in and loads the user's achievements, seeding the system catalog
    pub fn login(&self, username: &str, password: &str) -> Result<User> {
        let _guard = self.command()?;
        self.ledger.login(username, password)?;
        self.tracker.activate()?;
        self.ledger.current()
    }

    pub fn logout(&self) -> Result<()> {
        let _guard = self.command()?;
        self.tracker.deactivate()?;
        self.ledger.logout()
    }

    // Commands

    pub fn create_task(&self, task: Task) -> Result<Task> {
        let _guard = self.command()?;
        self.tasks.create_task(task)
    }

    pub fn update_task(&self, task: Task) -> Result<()> {
        let _guard = self.command()?;
        self.tasks.update_task(task)
    }

    pub fn remove_task(&self, id: i64) -> Result<()> {
        let _guard = self.command()?;
        self.tasks.remove_task(id)
    }

    pub fn complete_task(&self, id: i64) -> Result<Option<CompletionReport>> {
        let _guard = self.command()?;
        self.tasks.complete_task(id)
    }

    pub fn update_progress(&self, id: i64, delta: i64) -> Result<ProgressUpdate> {
        let _guard = self.command()?;
        self.tasks.update_progress(id, delta)
    }

    pub fn record_failure(&self, id: i64, use_forgiveness: bool) -> Result<FailureOutcome> {
        let _guard = self.command()?;
        self.tasks.record_failure(id, use_forgiveness)
    }

    pub fn distribute_attributes(&self, distribution: &AttributeSet) -> Result<User> {
        let _guard = self.command()?;
        let changes = self.ledger.distribute_attribute_points(distribution)?;
        self.ledger.announce(&changes)?;
        self.ledger.current()
    }

    pub fn create_custom_achievement(&self, achievement: Achievement) -> Result<Achievement> {
        let _guard = self.command()?;
        self.tracker.create_custom(achievement)
    }

    pub fn record_custom_progress(&self, id: i64, delta: i64) -> Result<Achievement> {
        let _guard = self.command()?;
        self.tracker.record_custom_progress(id, delta)
    }

    pub fn create_shop_item(&self, item: ShopItem) -> Result<ShopItem> {
        let _guard = self.command()?;
        self.shop.create_item(item)
    }

    pub fn purchase(&self, item_id: i64, quantity: i64) -> Result<PurchaseOutcome> {
        let _guard = self.command()?;
        self.shop.purchase(item_id, quantity)
    }

    pub fn use_inventory_item(&self, inventory_id: i64) -> Result<String> {
        let _guard = self.command()?;
        self.shop.use_inventory_item(inventory_id)
    }

    /// Once per UTC day; later calls return the stored outcome
    pub fn check_in(&self) -> Result<CheckIn> {
        self.check_in_at(Utc::now())
    }

    pub fn check_in_at(&self, now: DateTime<Utc>) -> Result<CheckIn> {
        let _guard = self.command()?;
        self.serendipity.check_in_at(now)
    }

    pub fn capture_growth(&self) -> Result<GrowthSnapshot> {
        let _guard = self.command()?;
        self.history.capture()
    }

    pub fn growth_timeline(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<GrowthSnapshot>> {
        let _guard = self.command()?;
        self.history.timeline(start, end)
    }

    pub fn export_growth_csv(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<String> {
        let _guard = self.command()?;
        self.history.export_csv(start, end)
    }

    // Timer work

    pub fn reset_daily_at(&self, now: DateTime<Utc>) -> Result<ResetSummary> {
        let _guard = self.command()?;
        self.tasks.reset_daily_tasks_at(now)
    }

    pub fn reset_weekly_at(&self, now: DateTime<Utc>) -> Result<ResetSummary> {
        let _guard = self.command()?;
        self.tasks.reset_weekly_tasks_at(now)
    }

    pub fn enforce_deadlines_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.command()?;
        self.tasks.enforce_semester_deadlines(now)
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.command()?;
        self.inventory.sweep_expired_at(now)
    }

    pub fn capture_all_growth_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.command()?;
        self.history.capture_all_at(now)
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let _guard = self.command()?;
        let user = self.ledger.current()?;
        Ok(Snapshot {
            available_attribute_points: user.available_attribute_points(),
            tasks: self.tasks.tasks()?,
            achievements: self.tracker.achievements()?,
            inventory: self.inventory.list_by_owner(&user.username)?,
            inventory_statistics: self.inventory.statistics_for_owner(&user.username)?,
            active_effects: self.inventory.active_effects(&user.username)?,
            check_in: self.serendipity.today_at(Utc::now())?,
            user,
        })
    }

    /// Daily and Monday resets, the semester deadline check, daily growth
    /// snapshots and the inventory sweep
    pub fn build_scheduler(self: &Arc<Self>) -> Scheduler {
        let mut scheduler = Scheduler::new();

        let engine = Arc::clone(self);
        scheduler.register("daily-reset", Cadence::Daily, move |now| {
            engine.reset_daily_at(now).map(|_| ())
        });
        let engine = Arc::clone(self);
        scheduler.register("weekly-reset", Cadence::Weekly(Weekday::Mon), move |now| {
            engine.reset_weekly_at(now).map(|_| ())
        });
        let engine = Arc::clone(self);
        scheduler.register("semester-deadlines", Cadence::Daily, move |now| {
            engine.enforce_deadlines_at(now).map(|_| ())
        });
        let engine = Arc::clone(self);
        scheduler.register("growth-snapshots", Cadence::Daily, move |now| {
            engine.capture_all_growth_at(now).map(|_| ())
        });
        let engine = Arc::clone(self);
        scheduler.register("inventory-sweep", Cadence::Every(self.sweep_interval), move |now| {
            engine.sweep_at(now).map(|_| ())
        });
        scheduler
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for id in self.journal_subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
        self.tracker.detach();
    }
}

fn subscribe_journal(bus: &EventBus, journal: &Arc<Journal>) -> Vec<SubscriptionId> {
    let j = Arc::clone(journal);
    let completed = bus.subscribe(move |e: &TaskCompleted| {
        j.record(
            JournalEntry::new("task_completed", format!("Completed {} task {}", e.task_type, e.task_id))
                .with_detail(serde_json::json!({ "task_id": e.task_id, "difficulty": e.difficulty })),
        );
        Ok(())
    });
    let j = Arc::clone(journal);
    let unlocked = bus.subscribe(move |e: &AchievementUnlocked| {
        j.record(
            JournalEntry::new("achievement_unlocked", format!("Unlocked '{}'", e.name))
                .with_detail(serde_json::json!({ "achievement_id": e.achievement_id })),
        );
        Ok(())
    });
    let j = Arc::clone(journal);
    let level = bus.subscribe(move |e: &LevelChanged| {
        j.record(JournalEntry::new("level_changed", format!("Reached level {}", e.level)));
        Ok(())
    });
    let j = Arc::clone(journal);
    let purchased = bus.subscribe(move |e: &ItemPurchased| {
        j.record(
            JournalEntry::new(
                "purchase",
                format!("Bought {} x{} for {} coins", e.item_name, e.quantity, e.total_cost),
            )
            .with_detail(serde_json::json!({ "item_id": e.item_id })),
        );
        Ok(())
    });
    let j = Arc::clone(journal);
    let serendipity = bus.subscribe(move |e: &SerendipityTriggered| {
        j.record(
            JournalEntry::new("serendipity", e.description.clone())
                .with_detail(serde_json::json!({ "owner": e.owner })),
        );
        Ok(())
    });
    vec![completed, unlocked, level, purchased, serendipity]
}
