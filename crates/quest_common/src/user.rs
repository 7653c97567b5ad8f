//! User profile: level, growth, coins, attributes and lifetime stats.

use serde::{Deserialize, Serialize};

use crate::error::{QuestError, Result};

pub const ATTRIBUTE_MIN: i32 = 0;
pub const ATTRIBUTE_MAX: i32 = 999;

/// Growth points needed per distributable attribute point
pub const GROWTH_PER_ATTRIBUTE_POINT: i64 = 50;

/// The six progression dimensions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet {
    pub execution: i32,
    pub perseverance: i32,
    pub decision: i32,
    pub knowledge: i32,
    pub social: i32,
    pub pride: i32,
}

impl AttributeSet {
    pub fn total(&self) -> i64 {
        [
            self.execution,
            self.perseverance,
            self.decision,
            self.knowledge,
            self.social,
            self.pride,
        ]
        .iter()
        .map(|v| *v as i64)
        .sum()
    }

    pub fn add(&mut self, other: &AttributeSet) {
        self.execution += other.execution;
        self.perseverance += other.perseverance;
        self.decision += other.decision;
        self.knowledge += other.knowledge;
        self.social += other.social;
        self.pride += other.pride;
    }

    pub fn is_zero(&self) -> bool {
        *self == AttributeSet::default()
    }

    pub fn has_negative(&self) -> bool {
        self.fields().iter().any(|(_, v)| *v < 0)
    }

    fn clamp(&mut self) {
        for value in self.fields_mut() {
            *value = (*value).clamp(ATTRIBUTE_MIN, ATTRIBUTE_MAX);
        }
    }

    /// Named view used by the blob codec and display code
    pub fn fields(&self) -> [(&'static str, i32); 6] {
        [
            ("execution", self.execution),
            ("perseverance", self.perseverance),
            ("decision", self.decision),
            ("knowledge", self.knowledge),
            ("social", self.social),
            ("pride", self.pride),
        ]
    }

    pub fn set_field(&mut self, name: &str, value: i32) -> bool {
        match name {
            "execution" => self.execution = value,
            "perseverance" => self.perseverance = value,
            "decision" => self.decision = value,
            "knowledge" => self.knowledge = value,
            "social" => self.social = value,
            "pride" => self.pride = value,
            _ => return false,
        }
        true
    }

    fn fields_mut(&mut self) -> [&mut i32; 6] {
        [
            &mut self.execution,
            &mut self.perseverance,
            &mut self.decision,
            &mut self.knowledge,
            &mut self.social,
            &mut self.pride,
        ]
    }
}

/// Category used for lifetime completion counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskCategory {
    Academic,
    Social,
    Personal,
}

/// Lifetime counters stored alongside the attribute blob
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub achievements_unlocked: u32,
    pub total_tasks_completed: u32,
    pub academic_tasks_completed: u32,
    pub social_tasks_completed: u32,
    pub personal_tasks_completed: u32,
    pub total_tasks_failed: u32,
    pub attribute_points_spent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    level: u32,
    growth_points: i64,
    coins: i64,
    attributes: AttributeSet,
    pub progress: ProgressStats,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            password_hash: password_hash.into(),
            level: 1,
            growth_points: 0,
            coins: 0,
            attributes: AttributeSet::default(),
            progress: ProgressStats::default(),
        }
    }

    /// Rebuild a user from persisted fields. Level is derived from growth.
    pub fn hydrate(
        id: i64,
        username: String,
        password_hash: String,
        growth_points: i64,
        coins: i64,
        attributes: AttributeSet,
        progress: ProgressStats,
    ) -> Self {
        let mut user = Self::new(id, username, password_hash);
        user.growth_points = growth_points.max(0);
        user.level = level_from_growth(user.growth_points);
        user.coins = coins.max(0);
        user.attributes = attributes;
        user.attributes.clamp();
        user.progress = progress;
        user
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn growth_points(&self) -> i64 {
        self.growth_points
    }

    pub fn coins(&self) -> i64 {
        self.coins
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    pub fn pride(&self) -> i32 {
        self.attributes.pride
    }

    /// Non-positive deltas are ignored
    pub fn add_growth(&mut self, delta: i64) {
        if delta <= 0 {
            return;
        }
        self.growth_points = self.growth_points.saturating_add(delta);
        self.level = level_from_growth(self.growth_points);
    }

    pub fn add_coins(&mut self, amount: i64) {
        if amount <= 0 {
            return;
        }
        self.coins = self.coins.saturating_add(amount);
    }

    pub fn spend_coins(&mut self, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Ok(());
        }
        if amount > self.coins {
            return Err(QuestError::validation(format!(
                "insufficient coins: need {}, have {}",
                amount, self.coins
            )));
        }
        self.coins -= amount;
        Ok(())
    }

    pub fn apply_attribute_bonus(&mut self, bonus: &AttributeSet) {
        self.attributes.add(bonus);
        self.attributes.clamp();
    }

    pub fn available_attribute_points(&self) -> i64 {
        let earned = self.growth_points / GROWTH_PER_ATTRIBUTE_POINT;
        (earned - self.progress.attribute_points_spent as i64).max(0)
    }

    pub fn distribute_attributes(&mut self, distribution: &AttributeSet) -> Result<()> {
        if distribution.has_negative() {
            return Err(QuestError::validation(
                "attribute distribution cannot contain negative values",
            ));
        }
        let requested = distribution.total();
        let available = self.available_attribute_points();
        if requested > available {
            return Err(QuestError::validation(format!(
                "distribution of {} points exceeds available {}",
                requested, available
            )));
        }
        let spent = u32::try_from(requested)
            .map_err(|_| QuestError::validation("attribute distribution is too large"))?;
        self.apply_attribute_bonus(distribution);
        self.progress.attribute_points_spent = self.progress.attribute_points_spent.saturating_add(spent);
        Ok(())
    }

    pub fn record_task_completion(&mut self, category: TaskCategory) {
        self.progress.total_tasks_completed += 1;
        match category {
            TaskCategory::Academic => self.progress.academic_tasks_completed += 1,
            TaskCategory::Social => self.progress.social_tasks_completed += 1,
            TaskCategory::Personal => self.progress.personal_tasks_completed += 1,
        }
    }

    pub fn record_task_failure(&mut self) {
        self.progress.total_tasks_failed = self.progress.total_tasks_failed.saturating_add(1);
    }

    pub fn record_achievement_unlock(&mut self) {
        self.progress.achievements_unlocked += 1;
    }

    pub fn attribute_summary(&self) -> String {
        self.attributes
            .fields()
            .iter()
            .map(|(name, value)| format!("{}:{}", name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `1 + floor(sqrt(growth / 100))`, never below 1
pub fn level_from_growth(growth_points: i64) -> u32 {
    if growth_points <= 0 {
        return 1;
    }
    let normalized = growth_points as f64 / 100.0;
    (1 + normalized.sqrt().floor() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_curve_examples() {
        assert_eq!(level_from_growth(0), 1);
        assert_eq!(level_from_growth(99), 1);
        assert_eq!(level_from_growth(100), 2);
        assert_eq!(level_from_growth(400), 3);
        assert_eq!(level_from_growth(2500), 6);
        assert_eq!(level_from_growth(-50), 1);
    }

    #[test]
    fn test_level_is_monotonic() {
        let mut previous = 1;
        for growth in (0..20_000).step_by(37) {
            let level = level_from_growth(growth);
            assert!(level >= previous);
            previous = level;
        }
    }

    #[test]
    fn test_spend_coins_never_negative() {
        let mut user = User::new(1, "ana", "");
        user.add_coins(30);
        assert!(user.spend_coins(31).is_err());
        assert_eq!(user.coins(), 30);
        user.spend_coins(30).unwrap();
        assert_eq!(user.coins(), 0);
    }

    #[test]
    fn test_attributes_clamped() {
        let mut user = User::new(1, "ana", "");
        user.apply_attribute_bonus(&AttributeSet { pride: 1500, social: -4, ..Default::default() });
        assert_eq!(user.pride(), ATTRIBUTE_MAX);
        assert_eq!(user.attributes().social, 0);
    }

    #[test]
    fn test_distribution_budget() {
        let mut user = User::new(1, "ana", "");
        user.add_growth(120);
        assert_eq!(user.available_attribute_points(), 2);

        let too_much = AttributeSet { knowledge: 3, ..Default::default() };
        assert!(matches!(user.distribute_attributes(&too_much), Err(QuestError::Validation(_))));
        assert_eq!(user.attributes().knowledge, 0);

        let ok = AttributeSet { knowledge: 1, decision: 1, ..Default::default() };
        user.distribute_attributes(&ok).unwrap();
        assert_eq!(user.available_attribute_points(), 0);
        assert_eq!(user.progress.attribute_points_spent, 2);
    }

    #[test]
    fn test_non_positive_growth_ignored() {
        let mut user = User::new(1, "ana", "");
        user.add_growth(-10);
        user.add_growth(0);
        assert_eq!(user.growth_points(), 0);
        assert_eq!(user.level(), 1);
    }
}
