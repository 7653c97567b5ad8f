//! Timed effect stacks (rest day, forgiveness coupon, double growth).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::shop_item::PropEffect;

/// Upper bound of any (user, effect) stack
pub const MAX_EFFECT_STACK: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEffect {
    pub effect: PropEffect,
    pub stack: u32,
    pub expires_at: DateTime<Utc>,
}

impl ActiveEffect {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.stack > 0 && self.expires_at > now
    }
}

/// Live effects of one user, one entry per effect type
#[derive(Debug, Clone, Default)]
pub struct EffectStacks {
    entries: HashMap<PropEffect, ActiveEffect>,
}

impl EffectStacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored rows; a later row for the same effect replaces an earlier one
    pub fn from_effects(effects: impl IntoIterator<Item = ActiveEffect>) -> Self {
        Self {
            entries: effects.into_iter().map(|e| (e.effect, e)).collect(),
        }
    }

    /// New entry: stack = min(delta, cap), expiry = now + duration.
    /// Existing entry: stack grows up to the cap and expiry extends by duration.
    pub fn register(&mut self, effect: PropEffect, delta: u32, duration: Duration, now: DateTime<Utc>) -> ActiveEffect {
        self.purge(now);
        let entry = self
            .entries
            .entry(effect)
            .and_modify(|e| {
                e.stack = e.stack.saturating_add(delta).min(MAX_EFFECT_STACK);
                e.expires_at += duration;
            })
            .or_insert_with(|| ActiveEffect {
                effect,
                stack: delta.min(MAX_EFFECT_STACK),
                expires_at: now + duration,
            });
        *entry
    }

    pub fn has_token(&mut self, effect: PropEffect, now: DateTime<Utc>) -> bool {
        self.purge(now);
        self.entries.get(&effect).map(|e| e.is_live(now)).unwrap_or(false)
    }

    /// Takes one token. An emptied stack expires immediately.
    pub fn consume(&mut self, effect: PropEffect, now: DateTime<Utc>) -> bool {
        self.purge(now);
        let Some(entry) = self.entries.get_mut(&effect) else {
            return false;
        };
        if !entry.is_live(now) {
            return false;
        }
        entry.stack -= 1;
        if entry.stack == 0 {
            self.entries.remove(&effect);
        }
        true
    }

    pub fn double_exp_multiplier(&mut self, now: DateTime<Utc>) -> f64 {
        self.purge(now);
        match self.entries.get(&PropEffect::DoubleExpCard) {
            Some(e) if e.is_live(now) => 1.0 + e.stack as f64,
            _ => 1.0,
        }
    }

    pub fn active(&mut self, now: DateTime<Utc>) -> Vec<ActiveEffect> {
        self.purge(now);
        let mut effects: Vec<ActiveEffect> = self.entries.values().copied().collect();
        effects.sort_by_key(|e| e.expires_at);
        effects
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, e| e.expires_at > now);
    }
}
