//! Daily check-in.
//!
//! The first check-in of a UTC day rolls for a surprise and stores the
//! result; later check-ins that day return the stored outcome. A reward
//! buff is read back by task completion through the store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::info;

use quest_common::config::SerendipitySettings;
use quest_common::events::SerendipityTriggered;
use quest_common::serendipity::{
    roll_with, EASTER_EGG_COINS, EASTER_EGG_GROWTH, EASTER_EGG_TASK, SMALL_REWARD_GROWTH,
};
use quest_common::{EventBus, Result, SerendipityKind, SerendipityOutcome, Task, TaskType};

use crate::ledger::{Ledger, LedgerChanges};
use crate::store::Store;
use crate::tasks::TaskManager;

const EASTER_EGG_DIFFICULTY: u8 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct CheckIn {
    pub day: String,
    pub outcome: SerendipityOutcome,
    /// False when the day's roll had already happened
    pub fresh: bool,
}

pub struct Serendipity {
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    tasks: Arc<TaskManager>,
    bus: Arc<EventBus>,
    odds: SerendipitySettings,
}

impl Serendipity {
    pub fn new(
        store: Arc<Store>,
        ledger: Arc<Ledger>,
        tasks: Arc<TaskManager>,
        bus: Arc<EventBus>,
        odds: SerendipitySettings,
    ) -> Self {
        Self {
            store,
            ledger,
            tasks,
            bus,
            odds: odds.clamped(),
        }
    }

    pub fn check_in(&self) -> Result<CheckIn> {
        self.check_in_at(Utc::now())
    }

    pub fn check_in_at(&self, now: DateTime<Utc>) -> Result<CheckIn> {
        let mut rng = rand::thread_rng();
        self.check_in_with(now, || rng.gen::<f64>())
    }

    /// `draw` supplies the uniform values for the roll
    pub fn check_in_with<F>(&self, now: DateTime<Utc>, draw: F) -> Result<CheckIn>
    where
        F: FnMut() -> f64,
    {
        let username = self.ledger.username()?;
        let day = now.format("%Y-%m-%d").to_string();

        let (outcome, spawned, changes, fresh) = self.ledger.atomically(|| {
            if let Some(outcome) = self.store.find_serendipity_roll(&username, &day)? {
                return Ok((outcome, None, LedgerChanges::default(), false));
            }
            let mut outcome = roll_with(&self.odds, draw);
            let mut spawned = None;
            let mut changes = LedgerChanges::default();
            match outcome.kind {
                SerendipityKind::RewardBuff => {
                    outcome.buff_until = Some(now + Duration::minutes(outcome.buff_duration_minutes));
                }
                SerendipityKind::EasterEggTask => {
                    let mut task = Task::new(EASTER_EGG_TASK, TaskType::Custom, EASTER_EGG_DIFFICULTY, now + Duration::days(1))
                        .with_rewards(EASTER_EGG_COINS, EASTER_EGG_GROWTH);
                    task.description = "Find a corner of campus you have never visited".to_string();
                    task.id = self.store.insert_task(&task)?;
                    outcome.spawned_task = Some(task.id);
                    spawned = Some(task);
                }
                SerendipityKind::SmallReward => {
                    changes = self.ledger.add_growth(SMALL_REWARD_GROWTH)?;
                }
                SerendipityKind::Calm => {}
            }
            self.store.insert_serendipity_roll(&username, &day, &outcome, now)?;
            Ok((outcome, spawned, changes, true))
        })?;

        if let Some(task) = spawned {
            self.tasks.adopt(task)?;
        }
        if fresh {
            info!("'{}' checked in for {}: {}", username, day, outcome.description);
            self.ledger.announce(&changes)?;
            if outcome.triggered() {
                self.bus.publish(&SerendipityTriggered {
                    owner: username,
                    description: outcome.description.clone(),
                })?;
            }
        }
        Ok(CheckIn { day, outcome, fresh })
    }

    /// Today's outcome, if the session user has checked in
    pub fn today_at(&self, now: DateTime<Utc>) -> Result<Option<SerendipityOutcome>> {
        let username = self.ledger.username()?;
        self.store
            .find_serendipity_roll(&username, &now.format("%Y-%m-%d").to_string())
    }
}
