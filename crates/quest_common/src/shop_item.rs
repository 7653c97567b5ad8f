//! Shop catalog entries and lucky-bag reward tables.

use serde::{Deserialize, Serialize};

use crate::error::QuestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemCategory {
    Physical,
    Prop,
    LuckyBag,
}

text_enum!(ItemCategory { Physical, Prop, LuckyBag });

/// Effect granted by a prop. `None` marks props without a tracked effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropEffect {
    None,
    RestDay,
    ForgivenessCoupon,
    DoubleExpCard,
}

text_enum!(PropEffect { None, RestDay, ForgivenessCoupon, DoubleExpCard });

impl PropEffect {
    /// Stored as an empty string when there is no effect
    pub fn from_column(value: &str) -> Self {
        if value.trim().is_empty() {
            return PropEffect::None;
        }
        value.parse().unwrap_or(PropEffect::None)
    }

    pub fn to_column(&self) -> &'static str {
        match self {
            PropEffect::None => "",
            other => other.as_str(),
        }
    }

    /// Pricing weight per billing unit
    pub fn weight(&self) -> f64 {
        match self {
            PropEffect::DoubleExpCard => 1.5,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LuckyRewardKind {
    Coins,
    ShopItem,
    Growth,
}

text_enum!(LuckyRewardKind { Coins, ShopItem, Growth });

/// One weighted entry of a lucky-bag table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuckyReward {
    #[serde(rename = "type")]
    pub kind: LuckyRewardKind,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub probability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<i64>,
    #[serde(default)]
    pub description: String,
}

impl LuckyReward {
    pub fn coins(amount: i64, probability: f64) -> Self {
        Self {
            kind: LuckyRewardKind::Coins,
            amount,
            probability,
            reference: None,
            description: format!("{} coins", amount),
        }
    }

    pub fn growth(amount: i64, probability: f64) -> Self {
        Self {
            kind: LuckyRewardKind::Growth,
            amount,
            probability,
            reference: None,
            description: format!("{} growth", amount),
        }
    }

    pub fn item(reference: i64, probability: f64, description: impl Into<String>) -> Self {
        Self {
            kind: LuckyRewardKind::ShopItem,
            amount: 1,
            probability,
            reference: Some(reference),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub icon_path: String,
    pub category: ItemCategory,
    pub price: i64,
    /// 0 means unlimited
    pub purchase_limit: u32,
    pub available: bool,
    pub effect_description: String,
    pub effect_logic: String,
    pub prop_effect: PropEffect,
    pub prop_duration_minutes: i64,
    pub usage_conditions: String,
    pub physical_redeem: String,
    pub physical_notes: String,
    pub lucky_rewards: Vec<LuckyReward>,
    pub level_requirement: u32,
}

impl ShopItem {
    pub fn new(name: impl Into<String>, category: ItemCategory, price: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            icon_path: String::new(),
            category,
            price,
            purchase_limit: 0,
            available: true,
            effect_description: String::new(),
            effect_logic: String::new(),
            prop_effect: PropEffect::None,
            prop_duration_minutes: 0,
            usage_conditions: String::new(),
            physical_redeem: String::new(),
            physical_notes: String::new(),
            lucky_rewards: Vec::new(),
            level_requirement: 0,
        }
    }

    pub fn prop(name: impl Into<String>, effect: PropEffect, duration_minutes: i64) -> Self {
        let mut item = Self::new(name, ItemCategory::Prop, 0);
        item.prop_effect = effect;
        item.prop_duration_minutes = duration_minutes;
        item
    }

    pub fn lucky_bag(name: impl Into<String>, rewards: Vec<LuckyReward>) -> Self {
        let mut item = Self::new(name, ItemCategory::LuckyBag, 0);
        item.lucky_rewards = rewards;
        item
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.purchase_limit = limit;
        self
    }

    pub fn with_level_requirement(mut self, level: u32) -> Self {
        self.level_requirement = level;
        self
    }

    pub fn has_limit(&self) -> bool {
        self.purchase_limit > 0
    }

    pub fn validate(&self) -> Result<(), QuestError> {
        if self.name.trim().is_empty() {
            return Err(QuestError::validation("item name cannot be empty"));
        }
        if self
            .lucky_rewards
            .iter()
            .any(|r| r.probability < 0.0 || !r.probability.is_finite())
        {
            return Err(QuestError::validation(
                "lucky bag probabilities must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prop_effect_column() {
        assert_eq!(PropEffect::from_column(""), PropEffect::None);
        assert_eq!(PropEffect::from_column("RestDay"), PropEffect::RestDay);
        assert_eq!(PropEffect::from_column("garbage"), PropEffect::None);
        assert_eq!(PropEffect::None.to_column(), "");
        assert_eq!(PropEffect::DoubleExpCard.to_column(), "DoubleExpCard");
    }

    #[test]
    fn test_lucky_reward_serializes_type_field() {
        let json = serde_json::to_string(&LuckyReward::coins(10, 0.5)).unwrap();
        assert!(json.contains("\"type\":\"Coins\""));
        assert!(!json.contains("reference"));
    }

    #[test]
    fn test_validation_rejects_negative_probability() {
        let bag = ShopItem::lucky_bag("Bag", vec![LuckyReward::coins(5, -0.1)]);
        assert!(bag.validate().is_err());
        assert!(ShopItem::new(" ", ItemCategory::Physical, 300).validate().is_err());
    }
}
