//! Inventory & effect ledger.
//!
//! Owned items live in `user_inventory`. Timed effects (rest day,
//! forgiveness coupon, double growth) are stacks kept in `active_effects`,
//! so every process sharing the database sees the same tokens.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use quest_common::{
    ActiveEffect, EffectStacks, InventoryItem, InventoryStatus, ItemCategory, PropEffect, Result,
    ShopItem,
};

use crate::store::Store;

/// Window used by `statistics_for_owner` for "expiring soon"
pub const EXPIRING_SOON_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InventoryStatistics {
    pub total: u32,
    pub physical: u32,
    pub props: u32,
    pub lucky_bags: u32,
    pub expiring_soon: u32,
}

pub struct Inventory {
    store: Arc<Store>,
    default_effect_minutes: i64,
}

impl Inventory {
    pub fn new(store: Arc<Store>, default_effect_minutes: i64) -> Self {
        Self {
            store,
            default_effect_minutes: default_effect_minutes.max(1),
        }
    }

    fn stacks(&self, username: &str) -> Result<EffectStacks> {
        Ok(EffectStacks::from_effects(self.store.load_effects(username)?))
    }

    /// Load, change and write back the user's stacks in one transaction
    fn update_stacks<T, F>(&self, username: &str, now: DateTime<Utc>, change: F) -> Result<T>
    where
        F: FnOnce(&mut EffectStacks) -> T,
    {
        let tx = self.store.begin()?;
        let mut stacks = self.stacks(username)?;
        let value = change(&mut stacks);
        self.store.save_effects(username, &stacks.active(now))?;
        tx.commit()?;
        Ok(value)
    }

    pub fn create_from_shop_item(
        &self,
        item: &ShopItem,
        owner: &str,
        quantity: u32,
        payload: Option<&str>,
    ) -> Result<InventoryItem> {
        self.create_from_shop_item_at(item, owner, quantity, payload, Utc::now())
    }

    pub fn create_from_shop_item_at(
        &self,
        item: &ShopItem,
        owner: &str,
        quantity: u32,
        payload: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<InventoryItem> {
        let mut entry = InventoryItem::new(owner, item.id, now);
        entry.quantity = quantity.max(1);
        if item.category == ItemCategory::Prop && item.prop_duration_minutes > 0 {
            entry.expiration_time = Some(now + Duration::minutes(item.prop_duration_minutes));
        }
        entry.payload = match payload {
            Some(text) if !text.is_empty() => text.to_string(),
            _ if item.category == ItemCategory::LuckyBag => {
                quest_common::codec::encode_lucky_rules(&item.lucky_rewards)
            }
            _ => "{}".to_string(),
        };
        entry.notes = match item.category {
            ItemCategory::Physical => format!("{} | {}", item.physical_redeem, item.physical_notes),
            _ => item.effect_description.clone(),
        };
        entry.id = self.store.insert_inventory(&entry)?;
        debug!("granted '{}' to {} (inventory {})", item.name, owner, entry.id);
        Ok(entry)
    }

    pub fn find(&self, id: i64) -> Result<Option<InventoryItem>> {
        self.store.find_inventory(id)
    }

    pub fn list_by_owner(&self, owner: &str) -> Result<Vec<InventoryItem>> {
        self.store.load_inventory(owner)
    }

    pub fn update(&self, item: &InventoryItem) -> Result<()> {
        self.store.update_inventory(item)
    }

    pub fn remove(&self, id: i64) -> Result<bool> {
        self.store.delete_inventory(id)
    }

    pub fn count_purchases(&self, owner: &str, item_id: i64) -> Result<i64> {
        self.store.count_purchases(owner, item_id)
    }

    pub fn statistics_for_owner(&self, owner: &str) -> Result<InventoryStatistics> {
        self.statistics_for_owner_at(owner, Utc::now())
    }

    pub fn statistics_for_owner_at(&self, owner: &str, now: DateTime<Utc>) -> Result<InventoryStatistics> {
        let mut stats = InventoryStatistics::default();
        let mut categories: HashMap<i64, Option<ItemCategory>> = HashMap::new();
        for item in self.store.load_inventory(owner)? {
            stats.total += 1;
            if item.expires_within(now, Duration::hours(EXPIRING_SOON_HOURS)) {
                stats.expiring_soon += 1;
            }
            let category = match categories.get(&item.item_id) {
                Some(known) => *known,
                None => {
                    let found = self.store.find_shop_item(item.item_id)?.map(|s| s.category);
                    categories.insert(item.item_id, found);
                    found
                }
            };
            match category {
                Some(ItemCategory::Physical) => stats.physical += 1,
                Some(ItemCategory::Prop) => stats.props += 1,
                Some(ItemCategory::LuckyBag) => stats.lucky_bags += 1,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Mark every past-expiration item Expired and drop stale effect stacks
    pub fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let tx = self.store.begin()?;
        let expired = self.store.load_expired_inventory(now)?;
        let count = expired.len();
        for mut item in expired {
            item.status = InventoryStatus::Expired;
            item.notes = "Effect expired, reclaimed by the system".to_string();
            self.store.update_inventory(&item)?;
        }
        let stale = self.store.delete_expired_effects(now)?;
        tx.commit()?;
        if count > 0 {
            info!("Marked {} inventory items expired", count);
        }
        if stale > 0 {
            debug!("dropped {} stale effect stacks", stale);
        }
        Ok(count)
    }

    /// Register the prop's effect for `username` and consume the item
    pub fn apply_prop_effect(&self, item: &ShopItem, entry: &mut InventoryItem, username: &str) -> Result<String> {
        self.apply_prop_effect_at(item, entry, username, Utc::now())
    }

    pub fn apply_prop_effect_at(
        &self,
        item: &ShopItem,
        entry: &mut InventoryItem,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let feedback = match item.prop_effect {
            PropEffect::RestDay => "Rest day registered: one daily streak is protected while it lasts",
            PropEffect::ForgivenessCoupon => "Forgiveness coupon stored: the next failure keeps its streak",
            PropEffect::DoubleExpCard => "Double growth active",
            PropEffect::None => "This prop has no effect",
        };
        let mut next = entry.clone();
        next.consume_all();
        next.payload = serde_json::json!({ "effect": item.prop_effect.as_str() }).to_string();
        self.store.update_inventory(&next)?;
        *entry = next;
        if item.prop_effect != PropEffect::None {
            self.register_effect_at(username, item.prop_effect, item.prop_duration_minutes, 1, now)?;
        }
        Ok(feedback.to_string())
    }

    pub fn mark_physical_redeemed(&self, entry: &mut InventoryItem, notes: &str) -> Result<()> {
        let mut next = entry.clone();
        next.consume_all();
        next.notes = notes.to_string();
        self.store.update_inventory(&next)?;
        *entry = next;
        Ok(())
    }

    pub fn mark_lucky_bag_opened(&self, entry: &mut InventoryItem, payload: &str) -> Result<()> {
        let mut next = entry.clone();
        next.consume_all();
        next.payload = payload.to_string();
        self.store.update_inventory(&next)?;
        *entry = next;
        Ok(())
    }

    /// Non-positive durations fall back to the configured default
    pub fn register_effect(
        &self,
        username: &str,
        effect: PropEffect,
        duration_minutes: i64,
        delta: u32,
    ) -> Result<ActiveEffect> {
        self.register_effect_at(username, effect, duration_minutes, delta, Utc::now())
    }

    pub fn register_effect_at(
        &self,
        username: &str,
        effect: PropEffect,
        duration_minutes: i64,
        delta: u32,
        now: DateTime<Utc>,
    ) -> Result<ActiveEffect> {
        let minutes = if duration_minutes > 0 {
            duration_minutes
        } else {
            self.default_effect_minutes
        };
        let active = self.update_stacks(username, now, |stacks| {
            stacks.register(effect, delta, Duration::minutes(minutes), now)
        })?;
        debug!("{} now has {:?} x{} until {}", username, effect, active.stack, active.expires_at);
        Ok(active)
    }

    pub fn has_effect_token(&self, username: &str, effect: PropEffect) -> Result<bool> {
        self.has_effect_token_at(username, effect, Utc::now())
    }

    pub fn has_effect_token_at(&self, username: &str, effect: PropEffect, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.stacks(username)?.has_token(effect, now))
    }

    pub fn consume_effect_token(&self, username: &str, effect: PropEffect) -> Result<bool> {
        self.consume_effect_token_at(username, effect, Utc::now())
    }

    pub fn consume_effect_token_at(&self, username: &str, effect: PropEffect, now: DateTime<Utc>) -> Result<bool> {
        let consumed = self.update_stacks(username, now, |stacks| stacks.consume(effect, now))?;
        if consumed {
            info!("{} used a {:?} token", username, effect);
        }
        Ok(consumed)
    }

    /// The first user, by name, holding a live token of `effect`
    pub fn find_token_holder_at(&self, effect: PropEffect, now: DateTime<Utc>) -> Result<Option<String>> {
        Ok(self.store.effect_holders(effect, now)?.into_iter().next())
    }

    pub fn double_exp_multiplier(&self, username: &str) -> Result<f64> {
        self.double_exp_multiplier_at(username, Utc::now())
    }

    pub fn double_exp_multiplier_at(&self, username: &str, now: DateTime<Utc>) -> Result<f64> {
        Ok(self.stacks(username)?.double_exp_multiplier(now))
    }

    pub fn active_effects(&self, username: &str) -> Result<Vec<ActiveEffect>> {
        self.active_effects_at(username, Utc::now())
    }

    pub fn active_effects_at(&self, username: &str, now: DateTime<Utc>) -> Result<Vec<ActiveEffect>> {
        Ok(self.stacks(username)?.active(now))
    }
}
