//! Shop transaction engine: catalog pricing, atomic purchases, lucky bags
//! and item use.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use quest_common::codec::LuckyRollPayload;
use quest_common::events::ItemPurchased;
use quest_common::{
    EventBus, InventoryItem, InventoryStatus, ItemCategory, LuckyReward, LuckyRewardKind,
    QuestError, Result, ShopItem, User,
};

use crate::inventory::Inventory;
use crate::ledger::{Ledger, LedgerChanges};
use crate::store::Store;

/// Minutes per prop billing unit
const PROP_BILLING_MINUTES: i64 = 30;
const LUCKY_BAG_MARKUP: f64 = 1.2;

/// Re-price `item` from its category formula
pub fn apply_pricing(item: &mut ShopItem, baseline: i64) {
    let baseline = baseline.max(1);
    if item.price <= 0 {
        item.price = baseline;
    }
    item.price = match item.category {
        ItemCategory::Physical => item.price.clamp(baseline * 5, baseline * 10),
        ItemCategory::Prop => {
            let minutes = item.prop_duration_minutes.max(PROP_BILLING_MINUTES);
            let units = (minutes + PROP_BILLING_MINUTES - 1) / PROP_BILLING_MINUTES;
            let price = (baseline as f64 * item.prop_effect.weight() * units as f64) as i64;
            price.max(baseline / 2)
        }
        ItemCategory::LuckyBag => {
            let expected = expected_value(&item.lucky_rewards, baseline);
            (expected * LUCKY_BAG_MARKUP).max(baseline as f64) as i64
        }
    };
}

/// Item rewards are valued at the baseline unit
pub fn expected_value(rewards: &[LuckyReward], baseline: i64) -> f64 {
    if rewards.is_empty() {
        return baseline as f64;
    }
    rewards
        .iter()
        .map(|r| match r.kind {
            LuckyRewardKind::Coins | LuckyRewardKind::Growth => r.amount as f64 * r.probability,
            LuckyRewardKind::ShopItem => baseline as f64 * r.probability,
        })
        .sum()
}

/// Checks in order: quantity, availability, level, balance, purchase limit
pub fn validate_purchase(item: &ShopItem, user: &User, quantity: i64, already_purchased: i64) -> std::result::Result<(), String> {
    if quantity <= 0 {
        return Err("Quantity must be greater than zero".to_string());
    }
    if u32::try_from(quantity).is_err() {
        return Err(format!("Quantity {} is too large", quantity));
    }
    if !item.available {
        return Err(format!("'{}' is not available", item.name));
    }
    if user.level() < item.level_requirement {
        return Err(format!("'{}' requires level {}", item.name, item.level_requirement));
    }
    let total = item.price.saturating_mul(quantity);
    if user.coins() < total {
        return Err(format!("Not enough coins: need {}, have {}", total, user.coins()));
    }
    if item.has_limit() && already_purchased + quantity > item.purchase_limit as i64 {
        return Err(format!(
            "Purchase limit reached for '{}' ({} of {})",
            item.name, already_purchased, item.purchase_limit
        ));
    }
    Ok(())
}

/// Pick a reward for `draw` in `[0, 1)`. The draw is scaled by the table's
/// probability sum, so tables need not sum to one.
pub fn roll_with(rewards: &[LuckyReward], draw: f64, baseline: i64) -> LuckyReward {
    let Some(last) = rewards.last() else {
        return LuckyReward::coins(baseline, 1.0);
    };
    let total: f64 = rewards.iter().map(|r| r.probability).sum();
    let target = if total > 0.0 { draw * total } else { draw };
    let mut cursor = 0.0;
    for reward in rewards {
        cursor += reward.probability;
        if target <= cursor {
            if reward.probability > 0.0 {
                return reward.clone();
            }
            break;
        }
    }
    last.clone()
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    pub success: bool,
    pub message: String,
    pub total_cost: i64,
    pub granted: Vec<InventoryItem>,
}

impl PurchaseOutcome {
    fn rejected(message: String) -> Self {
        Self {
            success: false,
            message,
            total_cost: 0,
            granted: Vec::new(),
        }
    }
}

pub struct Shop {
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    inventory: Arc<Inventory>,
    bus: Arc<EventBus>,
    baseline: i64,
    gate: Mutex<()>,
}

impl Shop {
    pub fn new(
        store: Arc<Store>,
        ledger: Arc<Ledger>,
        inventory: Arc<Inventory>,
        bus: Arc<EventBus>,
        baseline: i64,
    ) -> Self {
        Self {
            store,
            ledger,
            inventory,
            bus,
            baseline: baseline.max(1),
            gate: Mutex::new(()),
        }
    }

    fn gate(&self) -> Result<MutexGuard<'_, ()>> {
        self.gate
            .lock()
            .map_err(|_| QuestError::Persistence("shop lock poisoned".into()))
    }

    pub fn baseline(&self) -> i64 {
        self.baseline
    }

    pub fn create_item(&self, mut item: ShopItem) -> Result<ShopItem> {
        item.validate()?;
        apply_pricing(&mut item, self.baseline);
        item.id = self.store.insert_shop_item(&item)?;
        info!("Listed '{}' ({}) at {} coins", item.name, item.category, item.price);
        Ok(item)
    }

    pub fn update_item(&self, mut item: ShopItem) -> Result<ShopItem> {
        item.validate()?;
        apply_pricing(&mut item, self.baseline);
        self.store.update_shop_item(&item)?;
        Ok(item)
    }

    pub fn remove_item(&self, id: i64) -> Result<()> {
        if !self.store.delete_shop_item(id)? {
            return Err(QuestError::not_found("shop item", id));
        }
        info!("Removed shop item {}", id);
        Ok(())
    }

    pub fn list_items(&self, include_unavailable: bool) -> Result<Vec<ShopItem>> {
        let items = self.store.load_shop_items()?;
        Ok(items
            .into_iter()
            .filter(|i| include_unavailable || i.available)
            .collect())
    }

    pub fn find_item(&self, id: i64) -> Result<Option<ShopItem>> {
        self.store.find_shop_item(id)
    }

    /// Validation failures come back as an unsuccessful outcome, not an error
    pub fn purchase(&self, item_id: i64, quantity: i64) -> Result<PurchaseOutcome> {
        let gate = self.gate()?;
        let user = self.ledger.current()?;
        let item = self
            .store
            .find_shop_item(item_id)?
            .ok_or_else(|| QuestError::not_found("shop item", item_id))?;
        let purchased = self.inventory.count_purchases(&user.username, item.id)?;
        if let Err(reason) = validate_purchase(&item, &user, quantity, purchased) {
            info!("Purchase of '{}' rejected: {}", item.name, reason);
            return Ok(PurchaseOutcome::rejected(reason));
        }

        let units = u32::try_from(quantity)
            .map_err(|_| QuestError::validation(format!("quantity {} is too large", quantity)))?;
        let total_cost = item.price * quantity;
        let (granted, changes) = self.ledger.atomically(|| {
            let changes = self.ledger.spend_coins(total_cost)?;
            let granted = (0..quantity)
                .map(|_| self.inventory.create_from_shop_item(&item, &user.username, 1, None))
                .collect::<Result<Vec<_>>>()?;
            Ok((granted, changes))
        })?;
        drop(gate);

        let message = format!("Purchased {} x{} for {} coins", item.name, quantity, total_cost);
        info!("{}", message);
        self.ledger.announce(&changes)?;
        self.bus.publish(&ItemPurchased {
            item_id: item.id,
            item_name: item.name.clone(),
            quantity: units,
            total_cost,
        })?;
        Ok(PurchaseOutcome {
            success: true,
            message,
            total_cost,
            granted,
        })
    }

    pub fn open_lucky_bag(&self, item: &ShopItem) -> LuckyReward {
        let draw: f64 = rand::thread_rng().gen();
        roll_with(&item.lucky_rewards, draw, self.baseline)
    }

    /// Credit a lucky-bag reward to `username`
    pub fn apply_lucky_reward(&self, reward: &LuckyReward, username: &str) -> Result<LedgerChanges> {
        match reward.kind {
            LuckyRewardKind::Coins => self.ledger.add_coins(reward.amount),
            LuckyRewardKind::Growth => self.ledger.add_growth(reward.amount),
            LuckyRewardKind::ShopItem => {
                let Some(reference) = reward.reference.filter(|r| *r > 0) else {
                    warn!("lucky reward '{}' has no item reference", reward.description);
                    return Ok(LedgerChanges::default());
                };
                match self.store.find_shop_item(reference)? {
                    Some(item) => {
                        self.inventory.create_from_shop_item(&item, username, 1, None)?;
                    }
                    None => warn!("lucky reward references missing shop item {}", reference),
                }
                Ok(LedgerChanges::default())
            }
        }
    }

    pub fn use_inventory_item(&self, inventory_id: i64) -> Result<String> {
        self.use_inventory_item_at(inventory_id, Utc::now())
    }

    pub fn use_inventory_item_at(&self, inventory_id: i64, now: DateTime<Utc>) -> Result<String> {
        let gate = self.gate()?;
        let username = self.ledger.username()?;
        let mut entry = self
            .inventory
            .find(inventory_id)?
            .ok_or_else(|| QuestError::not_found("inventory item", inventory_id))?;
        if entry.owner != username {
            return Err(QuestError::validation("that item belongs to another user"));
        }
        if entry.status.is_terminal() {
            return Err(QuestError::validation(format!("item is already {}", entry.status)));
        }
        let item = self
            .store
            .find_shop_item(entry.item_id)?
            .ok_or_else(|| QuestError::not_found("shop item", entry.item_id))?;

        let (message, changes) = self.ledger.atomically(|| {
            if entry.is_expired(now) {
                entry.status = InventoryStatus::Expired;
                entry.notes = "Expired before use".to_string();
                self.inventory.update(&entry)?;
                return Ok((format!("'{}' has expired", item.name), LedgerChanges::default()));
            }
            match item.category {
                ItemCategory::Physical => {
                    let notes = format!("Redemption confirmed: {}", item.physical_redeem);
                    self.inventory.mark_physical_redeemed(&mut entry, &notes)?;
                    Ok((
                        format!("Redeem '{}': {}", item.name, item.physical_redeem),
                        LedgerChanges::default(),
                    ))
                }
                ItemCategory::Prop => {
                    let feedback = self.inventory.apply_prop_effect_at(&item, &mut entry, &username, now)?;
                    Ok((feedback, LedgerChanges::default()))
                }
                ItemCategory::LuckyBag => {
                    let reward = self.open_lucky_bag(&item);
                    let changes = self.apply_lucky_reward(&reward, &username)?;
                    let payload = serde_json::to_string(&LuckyRollPayload::from(&reward))?;
                    self.inventory.mark_lucky_bag_opened(&mut entry, &payload)?;
                    Ok((format!("Lucky bag opened: {}", reward.description), changes))
                }
            }
        })?;
        drop(gate);

        info!("Used inventory item {}: {}", inventory_id, message);
        self.ledger.announce(&changes)?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quest_common::PropEffect;
    use tempfile::tempdir;

    struct Fixture {
        shop: Shop,
        ledger: Arc<Ledger>,
        inventory: Arc<Inventory>,
        store: Arc<Store>,
        _dir: tempfile::TempDir,
    }

    fn fixture(coins: i64) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("shop.db")).unwrap());
        let bus = Arc::new(EventBus::new());
        let ledger = Arc::new(Ledger::new(Arc::clone(&store), Arc::clone(&bus)));
        ledger.create_account("ana", "pw").unwrap();
        ledger.login("ana", "pw").unwrap();
        let _ = ledger.add_coins(coins).unwrap();
        let inventory = Arc::new(Inventory::new(Arc::clone(&store), 1440));
        let shop = Shop::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&inventory),
            bus,
            60,
        );
        Fixture {
            shop,
            ledger,
            inventory,
            store,
            _dir: dir,
        }
    }

    #[test]
    fn test_physical_price_clamped() {
        let mut cheap = ShopItem::new("Pen", ItemCategory::Physical, 10);
        apply_pricing(&mut cheap, 60);
        assert_eq!(cheap.price, 300);

        let mut pricey = ShopItem::new("Hoodie", ItemCategory::Physical, 5000);
        apply_pricing(&mut pricey, 60);
        assert_eq!(pricey.price, 600);

        let mut free = ShopItem::new("Sticker", ItemCategory::Physical, 0);
        apply_pricing(&mut free, 60);
        assert_eq!(free.price, 300);
    }

    #[test]
    fn test_prop_price_per_billing_unit() {
        let mut card = ShopItem::prop("Double", PropEffect::DoubleExpCard, 45);
        apply_pricing(&mut card, 60);
        assert_eq!(card.price, 180); // 2 units x 60 x 1.5

        let mut rest = ShopItem::prop("Rest", PropEffect::RestDay, 0);
        apply_pricing(&mut rest, 60);
        assert_eq!(rest.price, 60);
    }

    #[test]
    fn test_lucky_bag_price_from_expected_value() {
        let mut bag = ShopItem::lucky_bag(
            "Bag",
            vec![LuckyReward::coins(200, 0.5), LuckyReward::item(3, 0.5, "mug")],
        );
        apply_pricing(&mut bag, 60);
        assert_eq!(bag.price, 156); // (100 + 30) x 1.2

        let mut empty = ShopItem::lucky_bag("Empty", vec![]);
        apply_pricing(&mut empty, 60);
        assert_eq!(empty.price, 72);

        let mut tiny = ShopItem::lucky_bag("Tiny", vec![LuckyReward::coins(1, 1.0)]);
        apply_pricing(&mut tiny, 60);
        assert_eq!(tiny.price, 60);
    }

    #[test]
    fn test_roll_walks_cumulative_table() {
        let table = vec![LuckyReward::coins(10, 1.0), LuckyReward::growth(20, 3.0)];
        assert_eq!(roll_with(&table, 0.0, 60).amount, 10);
        assert_eq!(roll_with(&table, 0.25, 60).amount, 10);
        assert_eq!(roll_with(&table, 0.26, 60).amount, 20);
        assert_eq!(roll_with(&table, 0.999, 60).kind, LuckyRewardKind::Growth);
    }

    #[test]
    fn test_roll_edge_cases() {
        let empty = roll_with(&[], 0.7, 60);
        assert_eq!(empty.kind, LuckyRewardKind::Coins);
        assert_eq!(empty.amount, 60);
        assert_eq!(empty.probability, 1.0);

        let zero = vec![LuckyReward::coins(5, 0.0), LuckyReward::coins(9, 0.0)];
        assert_eq!(roll_with(&zero, 0.3, 60).amount, 9);

        let leading_zero = vec![LuckyReward::coins(5, 0.0), LuckyReward::coins(9, 1.0)];
        assert_eq!(roll_with(&leading_zero, 0.0, 60).amount, 9);
    }

    #[test]
    fn test_purchase_debits_and_grants_units() {
        let f = fixture(1000);
        let card = f.shop.create_item(ShopItem::prop("Rest", PropEffect::RestDay, 60)).unwrap();
        assert_eq!(card.price, 120);

        let outcome = f.shop.purchase(card.id, 3).unwrap();
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.total_cost, 360);
        assert_eq!(outcome.granted.len(), 3);
        assert!(outcome.granted.iter().all(|g| g.quantity == 1));
        assert_eq!(f.ledger.current().unwrap().coins(), 640);
        assert_eq!(f.inventory.count_purchases("ana", card.id).unwrap(), 3);
    }

    #[test]
    fn test_purchase_limit_rejects_without_debit() {
        let f = fixture(2000);
        let mug = f
            .shop
            .create_item(ShopItem::new("Mug", ItemCategory::Physical, 300).with_limit(2))
            .unwrap();
        assert!(f.shop.purchase(mug.id, 2).unwrap().success);
        let balance = f.ledger.current().unwrap().coins();

        let outcome = f.shop.purchase(mug.id, 1).unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("limit"));
        assert_eq!(f.ledger.current().unwrap().coins(), balance);
    }

    #[test]
    fn test_purchase_validation_messages() {
        let f = fixture(100);
        let mug = f.shop.create_item(ShopItem::new("Mug", ItemCategory::Physical, 300)).unwrap();
        assert!(!f.shop.purchase(mug.id, 0).unwrap().success);
        let huge = f.shop.purchase(mug.id, i64::from(u32::MAX) + 1).unwrap();
        assert!(!huge.success);
        assert!(huge.message.contains("too large"));
        assert!(f.shop.purchase(mug.id, 1).unwrap().message.contains("Not enough coins"));

        let gated = f
            .shop
            .create_item(ShopItem::prop("Gated", PropEffect::RestDay, 30).with_level_requirement(5))
            .unwrap();
        assert!(f.shop.purchase(gated.id, 1).unwrap().message.contains("level"));

        assert!(matches!(f.shop.purchase(999, 1), Err(QuestError::NotFound(_))));
        f.ledger.logout().unwrap();
        assert!(matches!(f.shop.purchase(mug.id, 1), Err(QuestError::NoActiveSession)));
    }

    #[test]
    fn test_use_prop_registers_effect() {
        let f = fixture(500);
        let card = f.shop.create_item(ShopItem::prop("Double", PropEffect::DoubleExpCard, 60)).unwrap();
        let bought = f.shop.purchase(card.id, 1).unwrap();
        let entry = &bought.granted[0];

        let message = f.shop.use_inventory_item(entry.id).unwrap();
        assert!(message.contains("Double growth"));
        assert_eq!(f.inventory.double_exp_multiplier("ana").unwrap(), 2.0);
        let stored = f.inventory.find(entry.id).unwrap().unwrap();
        assert_eq!(stored.status, InventoryStatus::Consumed);

        assert!(matches!(f.shop.use_inventory_item(entry.id), Err(QuestError::Validation(_))));
    }

    #[test]
    fn test_use_expired_prop_marks_expired() {
        let f = fixture(500);
        let card = f.shop.create_item(ShopItem::prop("Rest", PropEffect::RestDay, 30)).unwrap();
        let entry = f.shop.purchase(card.id, 1).unwrap().granted.remove(0);

        let later = Utc::now() + Duration::hours(2);
        let message = f.shop.use_inventory_item_at(entry.id, later).unwrap();
        assert!(message.contains("expired"));
        assert_eq!(f.inventory.find(entry.id).unwrap().unwrap().status, InventoryStatus::Expired);
        assert!(!f.inventory.has_effect_token("ana", PropEffect::RestDay).unwrap());
    }

    #[test]
    fn test_open_lucky_bag_credits_reward() {
        let f = fixture(500);
        let bag = f
            .shop
            .create_item(ShopItem::lucky_bag("Bag", vec![LuckyReward::coins(250, 1.0)]))
            .unwrap();
        let entry = f.shop.purchase(bag.id, 1).unwrap().granted.remove(0);
        let after_purchase = f.ledger.current().unwrap().coins();

        let message = f.shop.use_inventory_item(entry.id).unwrap();
        assert!(message.contains("250 coins"));
        assert_eq!(f.ledger.current().unwrap().coins(), after_purchase + 250);
        let opened = f.inventory.find(entry.id).unwrap().unwrap();
        assert_eq!(opened.status, InventoryStatus::Consumed);
        assert!(opened.payload.contains("\"type\":\"Coins\""));
    }

    #[test]
    fn test_lucky_item_reward_grants_inventory() {
        let f = fixture(0);
        let mug = f.store.insert_shop_item(&ShopItem::new("Mug", ItemCategory::Physical, 300)).unwrap();
        f.shop
            .apply_lucky_reward(&LuckyReward::item(mug, 1.0, "a mug"), "ana")
            .unwrap();
        f.shop
            .apply_lucky_reward(&LuckyReward::item(4242, 1.0, "ghost"), "ana")
            .unwrap();
        assert_eq!(f.inventory.list_by_owner("ana").unwrap().len(), 1);
    }

    #[test]
    fn test_other_users_items_rejected() {
        let f = fixture(500);
        let mug = f.store.insert_shop_item(&ShopItem::new("Mug", ItemCategory::Physical, 300)).unwrap();
        let theirs = f
            .store
            .insert_inventory(&InventoryItem::new("bob", mug, Utc::now()))
            .unwrap();
        assert!(matches!(f.shop.use_inventory_item(theirs), Err(QuestError::Validation(_))));
        assert!(matches!(f.shop.use_inventory_item(777), Err(QuestError::NotFound(_))));
    }
}
