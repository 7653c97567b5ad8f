//! Achievements: multi-condition progress and the unlock transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QuestError, Result};
use crate::user::AttributeSet;

/// Reward-bearing custom achievements an owner may create per calendar month
pub const MONTHLY_REWARD_ACHIEVEMENT_CAP: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AchievementKind {
    System,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RewardType {
    WithReward,
    NoReward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressMode {
    Milestone,
    Incremental,
}

/// Source feeding a condition. Ordinals are part of the stored blob format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    CompleteAnyTask,
    CompleteTaskType,
    ReachLevel,
    ReachPride,
    ReachCoins,
    CustomCounter,
}

impl ConditionType {
    pub fn ordinal(&self) -> u8 {
        match self {
            ConditionType::CompleteAnyTask => 0,
            ConditionType::CompleteTaskType => 1,
            ConditionType::ReachLevel => 2,
            ConditionType::ReachPride => 3,
            ConditionType::ReachCoins => 4,
            ConditionType::CustomCounter => 5,
        }
    }

    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        match ordinal {
            0 => Some(ConditionType::CompleteAnyTask),
            1 => Some(ConditionType::CompleteTaskType),
            2 => Some(ConditionType::ReachLevel),
            3 => Some(ConditionType::ReachPride),
            4 => Some(ConditionType::ReachCoins),
            5 => Some(ConditionType::CustomCounter),
            _ => None,
        }
    }
}

text_enum!(AchievementKind { System, Custom });
text_enum!(RewardType { WithReward, NoReward });
text_enum!(ProgressMode { Milestone, Incremental });
text_enum!(ConditionType {
    CompleteAnyTask,
    CompleteTaskType,
    ReachLevel,
    ReachPride,
    ReachCoins,
    CustomCounter,
});

/// Metadata tag used by progress-update conditions
pub const TASK_PROGRESS_TAG: &str = "task_progress";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub condition_type: ConditionType,
    pub target: i64,
    pub current: i64,
    pub metadata: String,
}

impl Condition {
    pub fn new(condition_type: ConditionType, target: i64) -> Self {
        Self {
            condition_type,
            target,
            current: 0,
            metadata: String::new(),
        }
    }

    pub fn tagged(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Empty tags on either side match anything
    fn matches(&self, condition_type: ConditionType, metadata: &str) -> bool {
        if self.condition_type != condition_type {
            return false;
        }
        self.metadata.is_empty() || metadata.is_empty() || self.metadata == metadata
    }

    fn clamped(&self) -> i64 {
        self.current.clamp(0, self.target.max(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: i64,
    pub owner: String,
    pub creator: String,
    pub name: String,
    pub description: String,
    pub icon_path: String,
    pub display_color: String,
    pub kind: AchievementKind,
    pub reward_type: RewardType,
    pub progress_mode: ProgressMode,
    progress_value: i64,
    progress_goal: i64,
    pub reward_coins: i64,
    pub reward_attributes: AttributeSet,
    pub reward_items: Vec<String>,
    unlocked: bool,
    completion_time: Option<DateTime<Utc>>,
    conditions: Vec<Condition>,
    pub gallery_group: String,
    pub created_at: DateTime<Utc>,
    pub special_metadata: String,
}

impl Achievement {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        kind: AchievementKind,
        reward_type: RewardType,
        conditions: Vec<Condition>,
    ) -> Self {
        let owner = owner.into();
        let mut achievement = Self {
            id: 0,
            creator: owner.clone(),
            owner,
            name: name.into(),
            description: String::new(),
            icon_path: String::new(),
            display_color: String::new(),
            kind,
            reward_type,
            progress_mode: ProgressMode::Milestone,
            progress_value: 0,
            progress_goal: 1,
            reward_coins: 0,
            reward_attributes: AttributeSet::default(),
            reward_items: Vec::new(),
            unlocked: false,
            completion_time: None,
            conditions,
            gallery_group: String::new(),
            created_at: Utc::now(),
            special_metadata: String::new(),
        };
        achievement.recalculate_progress();
        achievement
    }

    pub fn progress_value(&self) -> i64 {
        self.progress_value
    }

    pub fn progress_goal(&self) -> i64 {
        self.progress_goal
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.completion_time
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn set_conditions(&mut self, conditions: Vec<Condition>) {
        self.conditions = conditions;
        self.recalculate_progress();
    }

    /// Restores persisted unlock state without side effects
    pub fn restore_unlock(&mut self, unlocked: bool, completion_time: Option<DateTime<Utc>>) {
        self.unlocked = unlocked;
        self.completion_time = completion_time;
    }

    pub fn has_reward(&self) -> bool {
        self.reward_type == RewardType::WithReward
    }

    /// goal = sum of targets, value = sum of each condition clamped to its target
    pub fn recalculate_progress(&mut self) {
        let goal: i64 = self.conditions.iter().map(|c| c.target.max(0)).sum();
        let value: i64 = self.conditions.iter().map(Condition::clamped).sum();
        self.progress_goal = goal.max(1);
        self.progress_value = value.min(self.progress_goal);
    }

    /// Adds `delta` to every matching condition. Returns true if anything moved.
    pub fn apply_increment(&mut self, condition_type: ConditionType, metadata: &str, delta: i64) -> bool {
        self.update_matching(condition_type, metadata, |c| c.current.saturating_add(delta))
    }

    /// Replaces the value of every matching condition. Returns true if anything moved.
    pub fn apply_absolute(&mut self, condition_type: ConditionType, metadata: &str, value: i64) -> bool {
        self.update_matching(condition_type, metadata, |_| value)
    }

    fn update_matching<F>(&mut self, condition_type: ConditionType, metadata: &str, next: F) -> bool
    where
        F: Fn(&Condition) -> i64,
    {
        if self.unlocked {
            return false;
        }
        let mut changed = false;
        for condition in self
            .conditions
            .iter_mut()
            .filter(|c| c.matches(condition_type, metadata))
        {
            let value = next(&*condition).clamp(0, condition.target.max(0));
            if value != condition.current {
                condition.current = value;
                changed = true;
            }
        }
        if changed {
            self.recalculate_progress();
        }
        changed
    }

    pub fn is_complete(&self) -> bool {
        self.progress_value >= self.progress_goal
    }

    /// false → true exactly once; returns whether this call made the transition
    pub fn mark_unlocked(&mut self, now: DateTime<Utc>) -> bool {
        if self.unlocked || !self.is_complete() {
            return false;
        }
        self.unlocked = true;
        self.completion_time = Some(now);
        true
    }

    pub fn progress_percent(&self) -> f64 {
        if self.unlocked {
            return 100.0;
        }
        (self.progress_value as f64 / self.progress_goal as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Custom achievements need a name and conditions that all have positive targets
    pub fn validate_custom(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(QuestError::validation("achievement name cannot be empty"));
        }
        if self.conditions.is_empty() {
            return Err(QuestError::validation("custom achievement needs at least one condition"));
        }
        if self.conditions.iter().any(|c| c.target <= 0) {
            return Err(QuestError::validation("every condition needs a positive target"));
        }
        Ok(())
    }
}
