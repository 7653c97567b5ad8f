//! Progression ledger: the active user's level, growth, coins and attributes.
//!
//! Every mutation works on a copy of the session user, persists it, and only
//! then swaps it in. Mutations report what moved as [`LedgerChanges`]; the
//! caller publishes them with [`Ledger::announce`] once its own transaction
//! has committed.

use std::sync::{Arc, Mutex, MutexGuard};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use quest_common::events::{CoinsChanged, LevelChanged, PrideChanged};
use quest_common::{AttributeSet, EventBus, QuestError, Result, TaskCategory, User};

use crate::store::Store;

/// Values that changed during a ledger mutation
#[must_use]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerChanges {
    pub level: Option<u32>,
    pub coins: Option<i64>,
    pub pride: Option<i32>,
    baseline: Option<Baseline>,
}

/// Values before the first mutation of a change set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Baseline {
    level: u32,
    coins: i64,
    pride: i32,
}

impl LedgerChanges {
    fn between(before: &User, after: &User) -> Self {
        Self {
            level: (before.level() != after.level()).then(|| after.level()),
            coins: (before.coins() != after.coins()).then(|| after.coins()),
            pride: (before.pride() != after.pride()).then(|| after.pride()),
            baseline: Some(Baseline {
                level: before.level(),
                coins: before.coins(),
                pride: before.pride(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.level.is_none() && self.coins.is_none() && self.pride.is_none()
    }

    /// Fold a later change set into this one. Later values win, and a value
    /// that ends where the first set started is no longer a change.
    pub fn merge(&mut self, later: LedgerChanges) {
        let baseline = self.baseline.or(later.baseline);
        self.level = later.level.or(self.level);
        self.coins = later.coins.or(self.coins);
        self.pride = later.pride.or(self.pride);
        self.baseline = baseline;
        if let Some(base) = baseline {
            self.level = self.level.filter(|v| *v != base.level);
            self.coins = self.coins.filter(|v| *v != base.coins);
            self.pride = self.pride.filter(|v| *v != base.pride);
        }
    }
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

pub struct Ledger {
    store: Arc<Store>,
    bus: Arc<EventBus>,
    session: Mutex<Option<User>>,
}

impl Ledger {
    pub fn new(store: Arc<Store>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            session: Mutex::new(None),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<User>>> {
        self.session
            .lock()
            .map_err(|_| QuestError::Persistence("ledger lock poisoned".into()))
    }

    pub fn create_account(&self, username: &str, password: &str) -> Result<i64> {
        let username = username.trim();
        if username.is_empty() {
            return Err(QuestError::validation("username cannot be empty"));
        }
        if password.is_empty() {
            return Err(QuestError::validation("password cannot be empty"));
        }
        let id = self.store.insert_user(username, &hash_password(password))?;
        info!("Created account '{}' (id {})", username, id);
        Ok(id)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<User> {
        let user = self
            .store
            .find_user(username.trim())?
            .filter(|u| u.password_hash == hash_password(password))
            .ok_or_else(|| QuestError::validation("invalid credentials"))?;
        info!("'{}' logged in at level {}", user.username, user.level());
        *self.lock()? = Some(user.clone());
        Ok(user)
    }

    pub fn logout(&self) -> Result<()> {
        if let Some(user) = self.lock()?.take() {
            info!("'{}' logged out", user.username);
        }
        Ok(())
    }

    /// Re-read the session user from the store, discarding unsaved state
    pub fn reload(&self) -> Result<()> {
        let username = self.username()?;
        let user = self
            .store
            .find_user(&username)?
            .ok_or_else(|| QuestError::not_found("user", &username))?;
        debug!("reloaded ledger for '{}'", username);
        *self.lock()? = Some(user);
        Ok(())
    }

    /// Best-effort reload after an enclosing transaction failed
    pub fn discard_uncommitted(&self) {
        if !self.is_logged_in() {
            return;
        }
        if let Err(e) = self.reload() {
            warn!("could not reload ledger after rollback: {}", e);
        }
    }

    /// Run `body` inside one store transaction. Any error rolls the whole
    /// transaction back and re-reads the session user before it is returned.
    pub fn atomically<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let tx = self.store.begin()?;
        match body() {
            Ok(value) => match tx.commit() {
                Ok(()) => Ok(value),
                Err(e) => {
                    self.discard_uncommitted();
                    Err(e)
                }
            },
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    warn!("rollback failed: {}", rb);
                }
                self.discard_uncommitted();
                Err(e)
            }
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn current(&self) -> Result<User> {
        self.lock()?.clone().ok_or(QuestError::NoActiveSession)
    }

    pub fn username(&self) -> Result<String> {
        self.lock()?
            .as_ref()
            .map(|u| u.username.clone())
            .ok_or(QuestError::NoActiveSession)
    }

    pub fn available_attribute_points(&self) -> Result<i64> {
        Ok(self.current()?.available_attribute_points())
    }

    /// The store transaction is opened before the session lock is taken,
    /// the same order `atomically` callers follow.
    fn mutate<F>(&self, apply: F) -> Result<LedgerChanges>
    where
        F: FnOnce(&mut User) -> Result<()>,
    {
        let tx = self.store.begin()?;
        let current = self.current()?;
        let mut next = current.clone();
        if let Err(e) = apply(&mut next) {
            // Nothing was written, so an enclosing transaction stays usable
            tx.commit()?;
            return Err(e);
        }
        self.store.update_user(&next)?;
        tx.commit()?;

        let changes = LedgerChanges::between(&current, &next);
        *self.lock()? = Some(next);
        Ok(changes)
    }

    /// Counts one failed task in the lifetime stats
    pub fn record_task_failure(&self) -> Result<LedgerChanges> {
        self.mutate(|user| {
            user.record_task_failure();
            Ok(())
        })
    }

    pub fn apply_task_reward(
        &self,
        growth: i64,
        coins: i64,
        bonus: &AttributeSet,
        category: TaskCategory,
    ) -> Result<LedgerChanges> {
        let changes = self.mutate(|user| {
            user.add_growth(growth);
            user.add_coins(coins);
            user.apply_attribute_bonus(bonus);
            user.record_task_completion(category);
            Ok(())
        })?;
        debug!("task reward applied: +{} growth, +{} coins", growth, coins);
        Ok(changes)
    }

    /// Counts one unlocked achievement without any payout
    pub fn unlock_achievement_credit(&self) -> Result<LedgerChanges> {
        self.mutate(|user| {
            user.record_achievement_unlock();
            Ok(())
        })
    }

    pub fn apply_achievement_reward(&self, coins: i64, attributes: &AttributeSet) -> Result<LedgerChanges> {
        self.mutate(|user| {
            user.record_achievement_unlock();
            user.add_coins(coins);
            user.apply_attribute_bonus(attributes);
            Ok(())
        })
    }

    pub fn distribute_attribute_points(&self, distribution: &AttributeSet) -> Result<LedgerChanges> {
        let changes = self.mutate(|user| user.distribute_attributes(distribution))?;
        info!("distributed {} attribute points", distribution.total());
        Ok(changes)
    }

    pub fn spend_coins(&self, amount: i64) -> Result<LedgerChanges> {
        self.mutate(|user| user.spend_coins(amount))
    }

    pub fn add_coins(&self, amount: i64) -> Result<LedgerChanges> {
        self.mutate(|user| {
            user.add_coins(amount);
            Ok(())
        })
    }

    pub fn add_growth(&self, amount: i64) -> Result<LedgerChanges> {
        self.mutate(|user| {
            user.add_growth(amount);
            Ok(())
        })
    }

    /// Publish one event per value that actually changed
    pub fn announce(&self, changes: &LedgerChanges) -> Result<()> {
        if let Some(level) = changes.level {
            info!("level is now {}", level);
            self.bus.publish(&LevelChanged { level })?;
        }
        if let Some(coins) = changes.coins {
            self.bus.publish(&CoinsChanged { coins })?;
        }
        if let Some(pride) = changes.pride {
            self.bus.publish(&PrideChanged { pride })?;
        }
        Ok(())
    }
}
