//! Task model and reward formulas.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuestError;
use crate::user::{AttributeSet, TaskCategory};

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;

/// Weekly streak length that earns an achievement credit
pub const WEEKLY_STREAK_CYCLE: u32 = 4;
/// Cumulative completions per type that earn an achievement credit
pub const TYPE_COMPLETION_MILESTONE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Daily,
    Weekly,
    Semester,
    Custom,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Daily,
        TaskType::Weekly,
        TaskType::Semester,
        TaskType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Daily => "Daily",
            TaskType::Weekly => "Weekly",
            TaskType::Semester => "Semester",
            TaskType::Custom => "Custom",
        }
    }

    pub fn category(&self) -> TaskCategory {
        match self {
            TaskType::Daily | TaskType::Semester => TaskCategory::Academic,
            TaskType::Weekly => TaskCategory::Social,
            TaskType::Custom => TaskCategory::Personal,
        }
    }

    fn type_bonus(&self) -> f64 {
        match self {
            TaskType::Semester => 0.35,
            TaskType::Weekly => 0.10,
            TaskType::Daily | TaskType::Custom => 0.0,
        }
    }

    /// Daily and Weekly tasks return to Pending on their periodic reset
    pub fn auto_resets(&self) -> bool {
        matches!(self, TaskType::Daily | TaskType::Weekly)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = QuestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(TaskType::Daily),
            "weekly" => Ok(TaskType::Weekly),
            "semester" => Ok(TaskType::Semester),
            "custom" => Ok(TaskType::Custom),
            other => Err(QuestError::validation(format!("unknown task type '{}'", other))),
        }
    }
}

/// Outcome of `record_failure`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureOutcome {
    /// A coupon absorbed the failure; streak and progress untouched
    Forgiven,
    /// Streak, progress and completion flag were reset
    StreakReset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub task_type: TaskType,
    difficulty: u8,
    pub deadline: DateTime<Utc>,
    pub completed: bool,
    pub coin_reward: i64,
    pub growth_reward: i64,
    pub attribute_reward: AttributeSet,
    bonus_streak: u32,
    pub custom_settings: String,
    pub forgiveness_coupons: u32,
    progress_value: i64,
    progress_goal: i64,
}

/// Rewards computed for one completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReward {
    pub coins: i64,
    pub growth: i64,
    pub attributes: AttributeSet,
}

impl Task {
    pub fn new(name: impl Into<String>, task_type: TaskType, difficulty: u8, deadline: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            task_type,
            difficulty: difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY),
            deadline,
            completed: false,
            coin_reward: 0,
            growth_reward: 0,
            attribute_reward: AttributeSet::default(),
            bonus_streak: 0,
            custom_settings: "{}".to_string(),
            forgiveness_coupons: 0,
            progress_value: 0,
            progress_goal: 1,
        }
    }

    pub fn with_rewards(mut self, coins: i64, growth: i64) -> Self {
        self.coin_reward = coins.max(0);
        self.growth_reward = growth.max(0);
        self
    }

    pub fn with_goal(mut self, goal: i64) -> Self {
        self.set_progress_goal(goal);
        self
    }

    pub fn with_streak(mut self, streak: u32) -> Self {
        self.bonus_streak = streak;
        self
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn set_difficulty(&mut self, stars: i64) {
        self.difficulty = stars.clamp(MIN_DIFFICULTY as i64, MAX_DIFFICULTY as i64) as u8;
    }

    pub fn bonus_streak(&self) -> u32 {
        self.bonus_streak
    }

    pub fn set_bonus_streak(&mut self, streak: i64) {
        self.bonus_streak = streak.max(0) as u32;
    }

    pub fn progress_value(&self) -> i64 {
        self.progress_value
    }

    pub fn progress_goal(&self) -> i64 {
        self.progress_goal
    }

    pub fn set_progress_goal(&mut self, goal: i64) {
        self.progress_goal = goal.max(1);
        self.progress_value = self.progress_value.clamp(0, self.progress_goal);
    }

    pub fn set_progress_value(&mut self, value: i64) {
        self.progress_value = value.clamp(0, self.progress_goal);
    }

    /// Adds `delta` and clamps into `[0, goal]`; returns true once the goal is reached
    pub fn advance_progress(&mut self, delta: i64) -> bool {
        self.set_progress_value(self.progress_value.saturating_add(delta));
        self.progress_value >= self.progress_goal
    }

    pub fn difficulty_factor(&self) -> f64 {
        1.0 + (self.difficulty as f64 - 1.0) * 0.15 + self.task_type.type_bonus()
    }

    pub fn streak_factor(&self) -> f64 {
        1.0 + self.bonus_streak as f64 * 0.05
    }

    pub fn final_coin_reward(&self) -> i64 {
        scale(self.coin_reward, self.difficulty_factor() * self.streak_factor())
    }

    pub fn final_growth_reward(&self) -> i64 {
        scale(self.growth_reward, self.difficulty_factor() * self.streak_factor())
    }

    /// Configured attribute reward plus the fixed bonus for the task type
    pub fn attribute_bonus(&self) -> AttributeSet {
        let stars = self.difficulty as i32;
        let mut bonus = self.attribute_reward;
        match self.task_type {
            TaskType::Daily => bonus.execution += 1,
            TaskType::Weekly => bonus.social += stars,
            TaskType::Semester => {
                bonus.knowledge += 2 * stars;
                bonus.perseverance += stars;
            }
            TaskType::Custom => {}
        }
        bonus
    }

    pub fn reward(&self) -> TaskReward {
        TaskReward {
            coins: self.final_coin_reward(),
            growth: self.final_growth_reward(),
            attributes: self.attribute_bonus(),
        }
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.bonus_streak += 1;
        self.progress_value = self.progress_goal;
    }

    /// Applies a failure. A coupon is only spent when `use_forgiveness` is set.
    pub fn record_failure(&mut self, use_forgiveness: bool) -> FailureOutcome {
        if use_forgiveness && self.forgiveness_coupons > 0 {
            self.forgiveness_coupons -= 1;
            return FailureOutcome::Forgiven;
        }
        self.hard_fail();
        FailureOutcome::StreakReset
    }

    pub fn hard_fail(&mut self) {
        self.bonus_streak = 0;
        self.reset_cycle();
    }

    pub fn reset_cycle(&mut self) {
        self.completed = false;
        self.progress_value = 0;
    }

    /// Periodic reset: incomplete tasks lose their streak unless `keep_streak`
    pub fn apply_periodic_reset(&mut self, keep_streak: bool) {
        if !self.completed && !keep_streak {
            self.bonus_streak = 0;
        }
        self.reset_cycle();
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.deadline < now
    }

    pub fn restore_progress(&mut self, value: i64, goal: i64) {
        self.progress_goal = goal.max(1);
        self.progress_value = value.clamp(0, self.progress_goal);
    }
}

fn scale(base: i64, factor: f64) -> i64 {
    ((base as f64) * factor).round().max(0.0) as i64
}
