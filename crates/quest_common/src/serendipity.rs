//! Daily check-in surprises.
//!
//! One roll per user per UTC day. Three independent draws are tried in
//! order (reward buff, easter-egg task, small growth gift); the first draw
//! under its chance decides the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SerendipitySettings;

/// Task rewards are boosted this much while a buff lasts
pub const BUFF_MULTIPLIER: f64 = 1.2;
pub const BUFF_MINUTES: i64 = 1440;
pub const SMALL_REWARD_GROWTH: i64 = 5;

pub const EASTER_EGG_TASK: &str = "Campus exploration";
pub const EASTER_EGG_COINS: i64 = 30;
pub const EASTER_EGG_GROWTH: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerendipityKind {
    Calm,
    RewardBuff,
    EasterEggTask,
    SmallReward,
}

text_enum!(SerendipityKind { Calm, RewardBuff, EasterEggTask, SmallReward });

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerendipityOutcome {
    pub kind: SerendipityKind,
    pub description: String,
    pub reward_multiplier: f64,
    pub buff_duration_minutes: i64,
    /// Set once the buff has been stamped onto a check-in
    pub buff_until: Option<DateTime<Utc>>,
    /// Id of the spawned easter-egg task
    pub spawned_task: Option<i64>,
}

impl SerendipityOutcome {
    fn new(kind: SerendipityKind, description: &str) -> Self {
        Self {
            kind,
            description: description.to_string(),
            reward_multiplier: 1.0,
            buff_duration_minutes: 0,
            buff_until: None,
            spawned_task: None,
        }
    }

    pub fn calm() -> Self {
        Self::new(SerendipityKind::Calm, "A quiet day on campus")
    }

    pub fn triggered(&self) -> bool {
        self.kind != SerendipityKind::Calm
    }

    pub fn boost_at(&self, now: DateTime<Utc>) -> Option<f64> {
        match self.buff_until {
            Some(until) if until > now && self.reward_multiplier > 1.0 => Some(self.reward_multiplier),
            _ => None,
        }
    }
}

/// `draw` yields uniform values in [0, 1); it is called at most three times
pub fn roll_with<F>(odds: &SerendipitySettings, mut draw: F) -> SerendipityOutcome
where
    F: FnMut() -> f64,
{
    let odds = odds.clamped();
    if draw() < odds.buff_chance {
        let mut outcome = SerendipityOutcome::new(SerendipityKind::RewardBuff, "Task rewards +20% today");
        outcome.reward_multiplier = BUFF_MULTIPLIER;
        outcome.buff_duration_minutes = BUFF_MINUTES;
        return outcome;
    }
    if draw() < odds.task_chance {
        return SerendipityOutcome::new(
            SerendipityKind::EasterEggTask,
            "Easter-egg task unlocked: Campus exploration",
        );
    }
    if draw() < odds.small_reward_chance {
        return SerendipityOutcome::new(SerendipityKind::SmallReward, "A small blessing: growth +5");
    }
    SerendipityOutcome::calm()
}
