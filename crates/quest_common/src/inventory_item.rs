//! Owned shop items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryStatus {
    Unused,
    Active,
    Consumed,
    Expired,
}

text_enum!(InventoryStatus { Unused, Active, Consumed, Expired });

impl InventoryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InventoryStatus::Consumed | InventoryStatus::Expired)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: i64,
    pub owner: String,
    pub item_id: i64,
    pub quantity: u32,
    pub used_quantity: u32,
    pub status: InventoryStatus,
    pub purchase_time: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    /// Lucky-bag rules before opening, roll result or effect payload after
    pub payload: String,
    pub notes: String,
}

impl InventoryItem {
    pub fn new(owner: impl Into<String>, item_id: i64, purchase_time: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            owner: owner.into(),
            item_id,
            quantity: 1,
            used_quantity: 0,
            status: InventoryStatus::Unused,
            purchase_time,
            expiration_time: None,
            payload: "{}".to_string(),
            notes: String::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.status == InventoryStatus::Expired {
            return true;
        }
        self.expiration_time.map(|t| t <= now).unwrap_or(false)
    }

    pub fn expires_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match self.expiration_time {
            Some(t) if !self.status.is_terminal() => t > now && t <= now + window,
            _ => false,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.used_quantity)
    }

    /// Props are all-or-nothing
    pub fn consume_all(&mut self) {
        self.used_quantity = self.quantity;
        self.status = InventoryStatus::Consumed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now();
        let mut item = InventoryItem::new("ana", 1, now);
        assert!(!item.is_expired(now));

        item.expiration_time = Some(now + Duration::hours(10));
        assert!(item.expires_within(now, Duration::hours(48)));
        assert!(!item.is_expired(now));
        assert!(item.is_expired(now + Duration::hours(10)));
    }

    #[test]
    fn test_consume_all_ignores_partial_use() {
        let mut item = InventoryItem::new("ana", 1, Utc::now());
        item.quantity = 3;
        item.used_quantity = 1;
        item.consume_all();
        assert_eq!(item.used_quantity, 3);
        assert_eq!(item.remaining(), 0);
        assert!(item.status.is_terminal());
    }
}
