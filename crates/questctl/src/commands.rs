//! Command implementations

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use quest_common::config::config_path;
use quest_common::{
    Achievement, AchievementKind, AttributeSet, Condition, ConditionType, ItemCategory,
    LuckyReward, PropEffect, QuestConfig, RewardType, ShopItem, Task, TaskType, User,
};
use questd::Engine;

use crate::output;
use crate::{AchievementSpec, AttributeSpec, ItemSpec, TaskSpec};

pub struct Session {
    engine: Engine,
    user: Option<String>,
    password: Option<String>,
    json: bool,
}

impl Session {
    pub fn open(config: Option<&Path>, user: Option<String>, password: Option<String>, json: bool) -> Result<Self> {
        let path = config.map(Path::to_path_buf).unwrap_or_else(config_path);
        let config = QuestConfig::load_from(&path)?;
        info!("Using config {} (store {})", path.display(), config.store.path.display());
        let engine = Engine::open(&config).context("opening the progression store")?;
        Ok(Self {
            engine,
            user,
            password,
            json,
        })
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (self.user.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) => Ok((user, password)),
            _ => bail!("this command needs --user and --password"),
        }
    }

    fn login(&self) -> Result<User> {
        let (user, password) = self.credentials()?;
        debug!("logging in as '{}'", user);
        Ok(self.engine.login(user, password)?)
    }

    /// JSON when asked for, otherwise the text renderer
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }

    pub fn register(&self) -> Result<()> {
        let (user, password) = self.credentials()?;
        let id = self.engine.register(user, password)?;
        output::success(&format!("Account '{}' created (id {})", user, id));
        Ok(())
    }

    pub fn status(&self) -> Result<()> {
        self.login()?;
        let snapshot = self.engine.snapshot()?;
        self.emit(&snapshot, output::status)
    }

    // Tasks

    pub fn task_add(&self, spec: TaskSpec) -> Result<()> {
        let deadline = Utc::now() + Duration::days(spec.days.max(0));
        let mut task = Task::new(spec.name, spec.task_type, spec.difficulty, deadline)
            .with_rewards(spec.coins, spec.growth)
            .with_goal(spec.goal);
        task.description = spec.description;
        task.forgiveness_coupons = spec.coupons;
        let task = self.engine.create_task(task)?;
        self.emit(&task, |t| output::success(&format!("Task '{}' added (id {})", t.name, t.id)))
    }

    pub fn task_list(&self, task_type: Option<TaskType>) -> Result<()> {
        let tasks = match task_type {
            Some(t) => self.engine.tasks().tasks_by_type(t)?,
            None => self.engine.tasks().tasks()?,
        };
        self.emit(&tasks, |t| output::tasks(t))
    }

    pub fn task_complete(&self, id: i64) -> Result<()> {
        self.login()?;
        match self.engine.complete_task(id)? {
            Some(report) => self.emit(&report, output::completion),
            None => {
                output::note(&format!("Task {} is already completed", id));
                Ok(())
            }
        }
    }

    pub fn task_progress(&self, id: i64, delta: i64) -> Result<()> {
        self.login()?;
        let update = self.engine.update_progress(id, delta)?;
        self.emit(&update, |u| {
            output::success(&format!(
                "'{}' at {}/{}",
                u.task.name,
                u.task.progress_value(),
                u.task.progress_goal()
            ));
            if let Some(report) = &u.completion {
                output::completion(report);
            }
        })
    }

    pub fn task_fail(&self, id: i64, forgive: bool) -> Result<()> {
        // A session lets a live coupon effect cover the failure
        if self.credentials().is_ok() {
            self.login()?;
        }
        let outcome = self.engine.record_failure(id, forgive)?;
        debug!("task {} failure recorded: {:?}", id, outcome);
        self.emit(&outcome, |o| output::note(&format!("Task {}: {:?}", id, o)))
    }

    pub fn task_remove(&self, id: i64) -> Result<()> {
        self.engine.remove_task(id)?;
        output::success(&format!("Task {} removed", id));
        Ok(())
    }

    // Shop

    pub fn shop_list(&self, all: bool) -> Result<()> {
        let items = self.engine.shop().list_items(all)?;
        self.emit(&items, |i| output::shop_items(i))
    }

    pub fn shop_add(&self, spec: ItemSpec) -> Result<()> {
        let mut item = match spec.category {
            ItemCategory::Prop => ShopItem::prop(
                spec.name,
                spec.effect.unwrap_or(PropEffect::None),
                spec.duration,
            ),
            ItemCategory::LuckyBag => {
                let rewards = match spec.lucky.as_deref() {
                    Some(table) => parse_lucky_table(table)?,
                    None => Vec::new(),
                };
                ShopItem::lucky_bag(spec.name, rewards)
            }
            ItemCategory::Physical => ShopItem::new(spec.name, ItemCategory::Physical, spec.price),
        };
        item.price = spec.price;
        item.purchase_limit = spec.limit;
        item.level_requirement = spec.level;
        item.physical_redeem = spec.redeem;
        item.description = spec.description;
        let item = self.engine.create_shop_item(item)?;
        self.emit(&item, |i| {
            output::success(&format!("Listed '{}' (id {}) at {} coins", i.name, i.id, i.price))
        })
    }

    pub fn shop_buy(&self, id: i64, quantity: i64) -> Result<()> {
        self.login()?;
        let outcome = self.engine.purchase(id, quantity)?;
        debug!("purchase of item {} x{}: {}", id, quantity, outcome.message);
        self.emit(&outcome, |o| {
            if o.success {
                output::success(&o.message);
            } else {
                output::warning(&o.message);
            }
        })
    }

    // Inventory

    pub fn inventory_list(&self) -> Result<()> {
        let user = self.login()?;
        let items = self.engine.inventory().list_by_owner(&user.username)?;
        self.emit(&items, |i| output::inventory(i))
    }

    pub fn inventory_use(&self, id: i64) -> Result<()> {
        self.login()?;
        let message = self.engine.use_inventory_item(id)?;
        output::success(&message);
        Ok(())
    }

    // Attributes

    pub fn attrs_assign(&self, spec: AttributeSpec) -> Result<()> {
        self.login()?;
        let distribution = AttributeSet {
            execution: spec.execution,
            perseverance: spec.perseverance,
            decision: spec.decision,
            knowledge: spec.knowledge,
            social: spec.social,
            pride: spec.pride,
        };
        let user = self.engine.distribute_attributes(&distribution)?;
        output::success(&format!(
            "Assigned {} points; {} left",
            distribution.total(),
            user.available_attribute_points()
        ));
        Ok(())
    }

    // Achievements

    pub fn achievement_list(&self, group: Option<String>) -> Result<()> {
        self.login()?;
        let tracker = self.engine.achievements();
        let achievements = match group {
            Some(g) => tracker.achievements_in_group(&g)?,
            None => tracker.achievements()?,
        };
        self.emit(&achievements, |a| output::achievements(a))
    }

    pub fn achievement_create(&self, spec: AchievementSpec) -> Result<()> {
        let user = self.login()?;
        let mut conditions = Vec::new();
        let wanted = [
            (ConditionType::ReachLevel, spec.level),
            (ConditionType::ReachPride, spec.pride),
            (ConditionType::ReachCoins, spec.coins_target),
            (ConditionType::CompleteAnyTask, spec.tasks),
            (ConditionType::CustomCounter, spec.counter),
        ];
        for (condition_type, target) in wanted {
            if let Some(target) = target {
                conditions.push(Condition::new(condition_type, target));
            }
        }
        if conditions.is_empty() {
            bail!("give at least one of --level, --pride, --coins-target, --tasks, --counter");
        }

        let reward_type = if spec.reward > 0 {
            RewardType::WithReward
        } else {
            RewardType::NoReward
        };
        let mut achievement = Achievement::new(
            user.username,
            spec.name,
            AchievementKind::Custom,
            reward_type,
            conditions,
        );
        achievement.reward_coins = spec.reward.max(0);
        achievement.gallery_group = spec.group;
        achievement.description = spec.description;

        let created = self.engine.create_custom_achievement(achievement)?;
        self.emit(&created, |a| {
            output::success(&format!("Achievement '{}' created (id {})", a.name, a.id))
        })
    }

    pub fn achievement_progress(&self, id: i64, delta: i64) -> Result<()> {
        self.login()?;
        let achievement = self.engine.record_custom_progress(id, delta)?;
        self.emit(&achievement, |a| output::achievements(std::slice::from_ref(a)))
    }

    pub fn reset(&self, task_type: TaskType) -> Result<()> {
        if self.credentials().is_ok() {
            self.login()?;
        }
        let now = Utc::now();
        info!("Running {} reset by hand", task_type);
        let summary = match task_type {
            TaskType::Weekly => self.engine.reset_weekly_at(now)?,
            _ => self.engine.reset_daily_at(now)?,
        };
        self.emit(&summary, |s| {
            output::success(&format!(
                "{} reset: {} tasks, {} semester deadlines failed",
                s.task_type, s.reset, s.deadlines_failed
            ))
        })
    }

    // Check-in and history

    pub fn check_in(&self) -> Result<()> {
        self.login()?;
        let check_in = self.engine.check_in()?;
        debug!("check-in for {} (fresh: {})", check_in.day, check_in.fresh);
        self.emit(&check_in, output::check_in)
    }

    pub fn history_capture(&self) -> Result<()> {
        self.login()?;
        let snapshot = self.engine.capture_growth()?;
        self.emit(&snapshot, |s| {
            output::success(&format!("Snapshot {} recorded at level {}", s.id, s.level))
        })
    }

    pub fn history_list(&self, days: Option<i64>, csv: bool) -> Result<()> {
        self.login()?;
        let start = days.map(|d| Utc::now() - Duration::days(d.max(0)));
        if csv {
            print!("{}", self.engine.export_growth_csv(start, None)?);
            return Ok(());
        }
        let timeline = self.engine.growth_timeline(start, None)?;
        self.emit(&timeline, |t| output::timeline(t))
    }
}

/// `kind:amount:probability` entries; items use `item:<shop id>:probability`
pub fn parse_lucky_table(table: &str) -> Result<Vec<LuckyReward>> {
    table
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [kind, amount, probability] = parts.as_slice() else {
                return Err(anyhow!("lucky entry '{}' is not kind:amount:probability", entry));
            };
            let amount: i64 = amount
                .parse()
                .with_context(|| format!("bad amount in '{}'", entry))?;
            let probability: f64 = probability
                .parse()
                .with_context(|| format!("bad probability in '{}'", entry))?;
            match kind.to_ascii_lowercase().as_str() {
                "coins" => Ok(LuckyReward::coins(amount, probability)),
                "growth" => Ok(LuckyReward::growth(amount, probability)),
                "item" => Ok(LuckyReward::item(amount, probability, format!("shop item #{}", amount))),
                other => Err(anyhow!("unknown lucky reward kind '{}'", other)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quest_common::LuckyRewardKind;

    #[test]
    fn test_parse_lucky_table() {
        let table = parse_lucky_table("coins:50:0.7, growth:20:0.2,item:4:0.1").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].amount, 50);
        assert_eq!(table[1].kind, LuckyRewardKind::Growth);
        assert_eq!(table[2].reference, Some(4));
    }

    #[test]
    fn test_parse_lucky_table_rejects_garbage() {
        assert!(parse_lucky_table("coins:50").is_err());
        assert!(parse_lucky_table("gems:1:0.5").is_err());
        assert!(parse_lucky_table("coins:x:0.5").is_err());
        assert!(parse_lucky_table("").unwrap().is_empty());
    }
}
