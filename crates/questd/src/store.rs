//! SQLite-backed persistent store.
//!
//! One connection behind a mutex. Transactions are reentrant per thread:
//! nested `begin` calls share the outermost physical transaction, only the
//! outermost commit writes, and a rollback at any depth aborts everything.
//! Other threads wait until the owning thread's transaction finishes.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use quest_common::codec::{self, UserBlob};
use quest_common::{
    Achievement, AchievementKind, ActiveEffect, AttributeSet, GrowthSnapshot, InventoryItem,
    InventoryStatus, ItemCategory, PropEffect, QuestError, Result, RewardType, SerendipityKind,
    SerendipityOutcome, ShopItem, Task, TaskType, User,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        level INTEGER NOT NULL DEFAULT 1,
        currency INTEGER NOT NULL DEFAULT 0,
        attributes_blob TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL,
        difficulty INTEGER NOT NULL DEFAULT 1,
        deadline TEXT NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        coin_reward INTEGER NOT NULL DEFAULT 0,
        growth_reward INTEGER NOT NULL DEFAULT 0,
        attribute_reward_blob TEXT NOT NULL DEFAULT '',
        bonus_streak INTEGER NOT NULL DEFAULT 0,
        custom_settings TEXT NOT NULL DEFAULT '{}',
        forgiveness_coupons INTEGER NOT NULL DEFAULT 0,
        progress_value INTEGER NOT NULL DEFAULT 0,
        progress_goal INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS achievements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        creator TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        icon_path TEXT NOT NULL DEFAULT '',
        display_color TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL,
        reward_type TEXT NOT NULL,
        progress_mode TEXT NOT NULL,
        progress_value INTEGER NOT NULL DEFAULT 0,
        progress_goal INTEGER NOT NULL DEFAULT 1,
        reward_coins INTEGER NOT NULL DEFAULT 0,
        reward_attributes_blob TEXT NOT NULL DEFAULT '',
        reward_items_blob TEXT NOT NULL DEFAULT '',
        unlocked INTEGER NOT NULL DEFAULT 0,
        completion_time TEXT,
        conditions_blob TEXT NOT NULL DEFAULT '',
        gallery_group TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        special_metadata TEXT NOT NULL DEFAULT ''
    );

    CREATE INDEX IF NOT EXISTS idx_achievements_owner ON achievements(owner);

    CREATE TABLE IF NOT EXISTS shop_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        icon_path TEXT NOT NULL DEFAULT '',
        item_type TEXT NOT NULL,
        price_coins INTEGER NOT NULL DEFAULT 0,
        purchase_limit INTEGER NOT NULL DEFAULT 0,
        available INTEGER NOT NULL DEFAULT 1,
        effect_description TEXT NOT NULL DEFAULT '',
        effect_logic TEXT NOT NULL DEFAULT '',
        prop_effect_type TEXT NOT NULL DEFAULT '',
        prop_duration_minutes INTEGER NOT NULL DEFAULT 0,
        usage_conditions TEXT NOT NULL DEFAULT '',
        physical_redeem TEXT NOT NULL DEFAULT '',
        physical_notes TEXT NOT NULL DEFAULT '',
        lucky_rules_json TEXT NOT NULL DEFAULT '',
        level_requirement INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_shop_items_type ON shop_items(item_type);

    CREATE TABLE IF NOT EXISTS user_inventory (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        item_id INTEGER NOT NULL,
        quantity INTEGER NOT NULL DEFAULT 1,
        used_quantity INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        purchase_time TEXT NOT NULL,
        expiration_time TEXT,
        lucky_payload TEXT NOT NULL DEFAULT '{}',
        notes TEXT NOT NULL DEFAULT ''
    );

    CREATE INDEX IF NOT EXISTS idx_inventory_owner ON user_inventory(owner);
    CREATE INDEX IF NOT EXISTS idx_inventory_item ON user_inventory(item_id);

    CREATE TABLE IF NOT EXISTS active_effects (
        owner TEXT NOT NULL,
        effect TEXT NOT NULL,
        stack INTEGER NOT NULL DEFAULT 1,
        expires_at TEXT NOT NULL,
        PRIMARY KEY (owner, effect)
    );

    CREATE TABLE IF NOT EXISTS growth_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        user_level INTEGER NOT NULL,
        growth_points INTEGER NOT NULL,
        execution INTEGER NOT NULL DEFAULT 0,
        perseverance INTEGER NOT NULL DEFAULT 0,
        decision INTEGER NOT NULL DEFAULT 0,
        knowledge INTEGER NOT NULL DEFAULT 0,
        social INTEGER NOT NULL DEFAULT 0,
        pride INTEGER NOT NULL DEFAULT 0,
        achievement_count INTEGER NOT NULL DEFAULT 0,
        completed_tasks INTEGER NOT NULL DEFAULT 0,
        failed_tasks INTEGER NOT NULL DEFAULT 0,
        journal_entries INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_snapshots_owner_time ON growth_snapshots(owner, timestamp);

    CREATE TABLE IF NOT EXISTS serendipity_rolls (
        owner TEXT NOT NULL,
        day TEXT NOT NULL,
        kind TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        multiplier REAL NOT NULL DEFAULT 1.0,
        buff_until TEXT,
        task_id INTEGER,
        rolled_at TEXT NOT NULL,
        PRIMARY KEY (owner, day)
    );
";

const TASK_COLUMNS: &str = "id, name, description, type, difficulty, deadline, completed, \
     coin_reward, growth_reward, attribute_reward_blob, bonus_streak, custom_settings, \
     forgiveness_coupons, progress_value, progress_goal";

const ACHIEVEMENT_COLUMNS: &str = "id, owner, creator, name, description, icon_path, \
     display_color, type, reward_type, progress_mode, progress_value, progress_goal, \
     reward_coins, reward_attributes_blob, reward_items_blob, unlocked, completion_time, \
     conditions_blob, gallery_group, created_at, special_metadata";

const SHOP_COLUMNS: &str = "id, name, description, icon_path, item_type, price_coins, \
     purchase_limit, available, effect_description, effect_logic, prop_effect_type, \
     prop_duration_minutes, usage_conditions, physical_redeem, physical_notes, \
     lucky_rules_json, level_requirement";

const INVENTORY_COLUMNS: &str = "id, owner, item_id, quantity, used_quantity, status, \
     purchase_time, expiration_time, lucky_payload, notes";

const SNAPSHOT_COLUMNS: &str = "id, owner, timestamp, user_level, growth_points, execution, \
     perseverance, decision, knowledge, social, pride, achievement_count, completed_tasks, \
     failed_tasks, journal_entries";

/// Wait this long for another process holding the database write lock
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Timestamps are stored as RFC 3339 text with second precision
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

fn parse_time_or_now(text: &str, column: &str) -> DateTime<Utc> {
    parse_time(text).unwrap_or_else(|| {
        warn!("unreadable {} '{}', using current time", column, text);
        Utc::now()
    })
}

/// Counters are stored as INTEGER; out-of-range values clamp into `u32`
fn count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn parse_or<T: std::str::FromStr>(text: &str, fallback: T, column: &str) -> T {
    text.parse().unwrap_or_else(|_| {
        warn!("unknown {} '{}', using default", column, text);
        fallback
    })
}

struct Inner {
    conn: Connection,
    depth: u32,
    owner: Option<ThreadId>,
    aborted: bool,
}

pub struct Store {
    inner: Mutex<Inner>,
    released: Condvar,
    path: PathBuf,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

impl Store {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("Opening progression store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn, path.to_path_buf())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                depth: 0,
                owner: None,
                aborted: false,
            }),
            released: Condvar::new(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the connection, waiting while another thread owns a transaction
    fn turn(&self) -> Result<MutexGuard<'_, Inner>> {
        let me = thread::current().id();
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| QuestError::Persistence("store lock poisoned".into()))?;
        while matches!(inner.owner, Some(owner) if owner != me) {
            inner = self
                .released
                .wait(inner)
                .map_err(|_| QuestError::Persistence("store lock poisoned".into()))?;
        }
        Ok(inner)
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let inner = self.turn()?;
        if inner.aborted {
            return Err(QuestError::Persistence(
                "statement issued inside a rolled back transaction".into(),
            ));
        }
        Ok(f(&inner.conn)?)
    }

    /// Begin (or join) this thread's transaction
    pub fn begin(&self) -> Result<Transaction<'_>> {
        let mut inner = self.turn()?;
        if inner.depth == 0 {
            inner.conn.execute_batch("BEGIN IMMEDIATE")?;
            inner.owner = Some(thread::current().id());
            inner.aborted = false;
        } else if inner.aborted {
            return Err(QuestError::Persistence(
                "cannot join a transaction that was rolled back".into(),
            ));
        }
        inner.depth += 1;
        debug!("transaction depth {}", inner.depth);
        Ok(Transaction {
            store: self,
            finished: false,
            _thread_bound: PhantomData,
        })
    }

    pub fn transaction_depth(&self) -> u32 {
        self.turn().map(|inner| inner.depth).unwrap_or(0)
    }

    fn finish(&self, commit: bool) -> Result<()> {
        let mut inner = self.turn()?;
        if inner.depth == 0 {
            return Err(QuestError::Persistence("no transaction in progress".into()));
        }
        let mut outcome = Ok(());
        if commit {
            if inner.aborted {
                outcome = Err(QuestError::Persistence(
                    "transaction was rolled back by a nested scope".into(),
                ));
            } else if inner.depth == 1 {
                if let Err(e) = inner.conn.execute_batch("COMMIT") {
                    // Leave nothing half-open behind a failed commit
                    if let Err(rb) = inner.conn.execute_batch("ROLLBACK") {
                        warn!("rollback after failed commit also failed: {}", rb);
                    }
                    outcome = Err(e.into());
                }
            }
        } else if !inner.aborted {
            inner.aborted = true;
            if let Err(e) = inner.conn.execute_batch("ROLLBACK") {
                outcome = Err(e.into());
            }
        }
        inner.depth -= 1;
        if inner.depth == 0 {
            inner.owner = None;
            inner.aborted = false;
            drop(inner);
            self.released.notify_all();
        }
        outcome
    }

    /// Run a raw statement batch; used for maintenance and diagnostics
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(sql))
    }

    // ---- users ----

    pub fn insert_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        if self.find_user(username)?.is_some() {
            return Err(QuestError::validation(format!(
                "username '{}' is already taken",
                username
            )));
        }
        let blob = codec::encode_user_blob(&UserBlob::default());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, level, currency, attributes_blob)
                 VALUES (?1, ?2, 1, 0, ?3)",
                params![username, password_hash, blob],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password, currency, attributes_blob FROM users WHERE username = ?1",
                params![username],
                |row| {
                    let blob: String = row.get(4)?;
                    let decoded = codec::decode_user_blob(&blob);
                    Ok(User::hydrate(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        decoded.growth_points,
                        row.get(3)?,
                        decoded.attributes,
                        decoded.progress,
                    ))
                },
            )
            .optional()
        })
    }

    pub fn load_usernames(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT username FROM users ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Level, currency and the attribute blob are written together
    pub fn update_user(&self, user: &User) -> Result<()> {
        let blob = codec::encode_user_blob(&UserBlob {
            growth_points: user.growth_points(),
            attributes: *user.attributes(),
            progress: user.progress,
        });
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET level = ?1, currency = ?2, attributes_blob = ?3 WHERE id = ?4",
                params![user.level(), user.coins(), blob, user.id],
            )
        })?;
        if changed == 0 {
            return Err(QuestError::not_found("user", &user.username));
        }
        Ok(())
    }

    // ---- tasks ----

    pub fn insert_task(&self, task: &Task) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (name, description, type, difficulty, deadline, completed,
                     coin_reward, growth_reward, attribute_reward_blob, bonus_streak,
                     custom_settings, forgiveness_coupons, progress_value, progress_goal)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    task.name,
                    task.description,
                    task.task_type.as_str(),
                    task.difficulty(),
                    format_time(task.deadline),
                    task.completed,
                    task.coin_reward,
                    task.growth_reward,
                    codec::encode_attributes(&task.attribute_reward),
                    task.bonus_streak(),
                    task.custom_settings,
                    task.forgiveness_coupons,
                    task.progress_value(),
                    task.progress_goal(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_task(&self, task: &Task) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET name = ?1, description = ?2, type = ?3, difficulty = ?4,
                     deadline = ?5, completed = ?6, coin_reward = ?7, growth_reward = ?8,
                     attribute_reward_blob = ?9, bonus_streak = ?10, custom_settings = ?11,
                     forgiveness_coupons = ?12, progress_value = ?13, progress_goal = ?14
                 WHERE id = ?15",
                params![
                    task.name,
                    task.description,
                    task.task_type.as_str(),
                    task.difficulty(),
                    format_time(task.deadline),
                    task.completed,
                    task.coin_reward,
                    task.growth_reward,
                    codec::encode_attributes(&task.attribute_reward),
                    task.bonus_streak(),
                    task.custom_settings,
                    task.forgiveness_coupons,
                    task.progress_value(),
                    task.progress_goal(),
                    task.id,
                ],
            )
        })?;
        if changed == 0 {
            return Err(QuestError::not_found("task", task.id));
        }
        Ok(())
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let changed = self.with_conn(|conn| conn.execute("DELETE FROM tasks WHERE id = ?1", params![id]))?;
        Ok(changed > 0)
    }

    pub fn load_tasks(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM tasks ORDER BY id", TASK_COLUMNS))?;
            let rows = stmt.query_map([], task_from_row)?;
            rows.collect()
        })
    }

    pub fn find_task(&self, id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                task_from_row,
            )
            .optional()
        })
    }

    // ---- achievements ----

    pub fn insert_achievement(&self, achievement: &Achievement) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO achievements ({}) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                         ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                    ACHIEVEMENT_COLUMNS
                ),
                params![
                    achievement.owner,
                    achievement.creator,
                    achievement.name,
                    achievement.description,
                    achievement.icon_path,
                    achievement.display_color,
                    achievement.kind.as_str(),
                    achievement.reward_type.as_str(),
                    achievement.progress_mode.as_str(),
                    achievement.progress_value(),
                    achievement.progress_goal(),
                    achievement.reward_coins,
                    codec::encode_reward_attributes(&achievement.reward_attributes),
                    codec::encode_reward_items(&achievement.reward_items),
                    achievement.is_unlocked(),
                    achievement.completion_time().map(format_time),
                    codec::encode_conditions(achievement.conditions()),
                    achievement.gallery_group,
                    format_time(achievement.created_at),
                    achievement.special_metadata,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_achievement(&self, achievement: &Achievement) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE achievements SET owner = ?1, creator = ?2, name = ?3, description = ?4,
                     icon_path = ?5, display_color = ?6, type = ?7, reward_type = ?8,
                     progress_mode = ?9, progress_value = ?10, progress_goal = ?11,
                     reward_coins = ?12, reward_attributes_blob = ?13, reward_items_blob = ?14,
                     unlocked = ?15, completion_time = ?16, conditions_blob = ?17,
                     gallery_group = ?18, special_metadata = ?19
                 WHERE id = ?20",
                params![
                    achievement.owner,
                    achievement.creator,
                    achievement.name,
                    achievement.description,
                    achievement.icon_path,
                    achievement.display_color,
                    achievement.kind.as_str(),
                    achievement.reward_type.as_str(),
                    achievement.progress_mode.as_str(),
                    achievement.progress_value(),
                    achievement.progress_goal(),
                    achievement.reward_coins,
                    codec::encode_reward_attributes(&achievement.reward_attributes),
                    codec::encode_reward_items(&achievement.reward_items),
                    achievement.is_unlocked(),
                    achievement.completion_time().map(format_time),
                    codec::encode_conditions(achievement.conditions()),
                    achievement.gallery_group,
                    achievement.special_metadata,
                    achievement.id,
                ],
            )
        })?;
        if changed == 0 {
            return Err(QuestError::not_found("achievement", achievement.id));
        }
        Ok(())
    }

    pub fn delete_achievement(&self, id: i64) -> Result<bool> {
        let changed = self.with_conn(|conn| {
            conn.execute("DELETE FROM achievements WHERE id = ?1", params![id])
        })?;
        Ok(changed > 0)
    }

    pub fn load_achievements(&self, owner: &str) -> Result<Vec<Achievement>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM achievements WHERE owner = ?1 ORDER BY id",
                ACHIEVEMENT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![owner], achievement_from_row)?;
            rows.collect()
        })
    }

    pub fn find_achievement_id(&self, owner: &str, name: &str, kind: AchievementKind) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM achievements WHERE owner = ?1 AND name = ?2 AND type = ?3",
                params![owner, name, kind.as_str()],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Reward-bearing custom achievements created by `owner` in `month` (`YYYY-MM`)
    pub fn count_reward_customs_in_month(&self, owner: &str, month: &str) -> Result<u32> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(1) FROM achievements
                 WHERE owner = ?1 AND type = ?2 AND reward_type = ?3
                   AND substr(created_at, 1, 7) = ?4",
                params![
                    owner,
                    AchievementKind::Custom.as_str(),
                    RewardType::WithReward.as_str(),
                    month
                ],
                |row| row.get(0),
            )
        })
    }

    // ---- shop ----

    pub fn insert_shop_item(&self, item: &ShopItem) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO shop_items ({}) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                         ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    SHOP_COLUMNS
                ),
                params![
                    item.name,
                    item.description,
                    item.icon_path,
                    item.category.as_str(),
                    item.price,
                    item.purchase_limit,
                    item.available,
                    item.effect_description,
                    item.effect_logic,
                    item.prop_effect.to_column(),
                    item.prop_duration_minutes,
                    item.usage_conditions,
                    item.physical_redeem,
                    item.physical_notes,
                    codec::encode_lucky_rules(&item.lucky_rewards),
                    item.level_requirement,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_shop_item(&self, item: &ShopItem) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE shop_items SET name = ?1, description = ?2, icon_path = ?3, item_type = ?4,
                     price_coins = ?5, purchase_limit = ?6, available = ?7,
                     effect_description = ?8, effect_logic = ?9, prop_effect_type = ?10,
                     prop_duration_minutes = ?11, usage_conditions = ?12, physical_redeem = ?13,
                     physical_notes = ?14, lucky_rules_json = ?15, level_requirement = ?16
                 WHERE id = ?17",
                params![
                    item.name,
                    item.description,
                    item.icon_path,
                    item.category.as_str(),
                    item.price,
                    item.purchase_limit,
                    item.available,
                    item.effect_description,
                    item.effect_logic,
                    item.prop_effect.to_column(),
                    item.prop_duration_minutes,
                    item.usage_conditions,
                    item.physical_redeem,
                    item.physical_notes,
                    codec::encode_lucky_rules(&item.lucky_rewards),
                    item.level_requirement,
                    item.id,
                ],
            )
        })?;
        if changed == 0 {
            return Err(QuestError::not_found("shop item", item.id));
        }
        Ok(())
    }

    pub fn delete_shop_item(&self, id: i64) -> Result<bool> {
        let changed = self.with_conn(|conn| conn.execute("DELETE FROM shop_items WHERE id = ?1", params![id]))?;
        Ok(changed > 0)
    }

    pub fn load_shop_items(&self) -> Result<Vec<ShopItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM shop_items ORDER BY id", SHOP_COLUMNS))?;
            let rows = stmt.query_map([], shop_item_from_row)?;
            rows.collect()
        })
    }

    pub fn find_shop_item(&self, id: i64) -> Result<Option<ShopItem>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM shop_items WHERE id = ?1", SHOP_COLUMNS),
                params![id],
                shop_item_from_row,
            )
            .optional()
        })
    }

    // ---- inventory ----

    pub fn insert_inventory(&self, item: &InventoryItem) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO user_inventory ({}) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    INVENTORY_COLUMNS
                ),
                params![
                    item.owner,
                    item.item_id,
                    item.quantity,
                    item.used_quantity,
                    item.status.as_str(),
                    format_time(item.purchase_time),
                    item.expiration_time.map(format_time),
                    item.payload,
                    item.notes,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_inventory(&self, item: &InventoryItem) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE user_inventory SET owner = ?1, item_id = ?2, quantity = ?3,
                     used_quantity = ?4, status = ?5, purchase_time = ?6,
                     expiration_time = ?7, lucky_payload = ?8, notes = ?9
                 WHERE id = ?10",
                params![
                    item.owner,
                    item.item_id,
                    item.quantity,
                    item.used_quantity,
                    item.status.as_str(),
                    format_time(item.purchase_time),
                    item.expiration_time.map(format_time),
                    item.payload,
                    item.notes,
                    item.id,
                ],
            )
        })?;
        if changed == 0 {
            return Err(QuestError::not_found("inventory item", item.id));
        }
        Ok(())
    }

    pub fn delete_inventory(&self, id: i64) -> Result<bool> {
        let changed = self.with_conn(|conn| {
            conn.execute("DELETE FROM user_inventory WHERE id = ?1", params![id])
        })?;
        Ok(changed > 0)
    }

    pub fn load_inventory(&self, owner: &str) -> Result<Vec<InventoryItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM user_inventory WHERE owner = ?1 ORDER BY id",
                INVENTORY_COLUMNS
            ))?;
            let rows = stmt.query_map(params![owner], inventory_from_row)?;
            rows.collect()
        })
    }

    pub fn find_inventory(&self, id: i64) -> Result<Option<InventoryItem>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM user_inventory WHERE id = ?1", INVENTORY_COLUMNS),
                params![id],
                inventory_from_row,
            )
            .optional()
        })
    }

    /// Historical quantity of `item_id` owned by `owner`, whatever its status
    pub fn count_purchases(&self, owner: &str, item_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(quantity), 0) FROM user_inventory WHERE owner = ?1 AND item_id = ?2",
                params![owner, item_id],
                |row| row.get(0),
            )
        })
    }

    /// Items with an expiration at or before `now` that are not yet Expired
    pub fn load_expired_inventory(&self, now: DateTime<Utc>) -> Result<Vec<InventoryItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM user_inventory
                 WHERE expiration_time IS NOT NULL AND expiration_time <= ?1 AND status != ?2
                 ORDER BY id",
                INVENTORY_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![format_time(now), InventoryStatus::Expired.as_str()],
                inventory_from_row,
            )?;
            rows.collect()
        })
    }

    // ---- active effects ----

    pub fn load_effects(&self, owner: &str) -> Result<Vec<ActiveEffect>> {
        let effects: Vec<ActiveEffect> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT effect, stack, expires_at FROM active_effects WHERE owner = ?1 ORDER BY expires_at",
            )?;
            let rows = stmt.query_map(params![owner], effect_from_row)?;
            rows.collect()
        })?;
        Ok(effects.into_iter().filter(|e| e.effect != PropEffect::None).collect())
    }

    /// Replace the owner's stacks with `effects`
    pub fn save_effects(&self, owner: &str, effects: &[ActiveEffect]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM active_effects WHERE owner = ?1", params![owner])?;
            let mut stmt = conn.prepare(
                "INSERT INTO active_effects (owner, effect, stack, expires_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for effect in effects.iter().filter(|e| e.stack > 0) {
                stmt.execute(params![owner, effect.effect.as_str(), effect.stack, format_time(effect.expires_at)])?;
            }
            Ok(())
        })
    }

    /// Owners holding a live stack of `effect`, by name
    pub fn effect_holders(&self, effect: PropEffect, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT owner FROM active_effects
                 WHERE effect = ?1 AND stack > 0 AND expires_at > ?2
                 ORDER BY owner",
            )?;
            let rows = stmt.query_map(params![effect.as_str(), format_time(now)], |row| row.get(0))?;
            rows.collect()
        })
    }

    pub fn delete_expired_effects(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM active_effects WHERE expires_at <= ?1 OR stack <= 0",
                params![format_time(now)],
            )
        })
    }

    // ---- growth history ----

    pub fn insert_snapshot(&self, snapshot: &GrowthSnapshot) -> Result<i64> {
        let a = &snapshot.attributes;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO growth_snapshots (owner, timestamp, user_level, growth_points, execution,
                     perseverance, decision, knowledge, social, pride, achievement_count,
                     completed_tasks, failed_tasks, journal_entries)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    snapshot.owner,
                    format_time(snapshot.timestamp),
                    snapshot.level,
                    snapshot.growth_points,
                    a.execution,
                    a.perseverance,
                    a.decision,
                    a.knowledge,
                    a.social,
                    a.pride,
                    snapshot.achievement_count,
                    snapshot.completed_tasks,
                    snapshot.failed_tasks,
                    snapshot.journal_entries,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Oldest first; either bound may be open
    pub fn load_snapshots(
        &self,
        owner: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<GrowthSnapshot>> {
        let start = start.map(format_time).unwrap_or_default();
        let end = end.map(format_time).unwrap_or_else(|| "9999".to_string());
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM growth_snapshots
                 WHERE owner = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 ORDER BY timestamp, id",
                SNAPSHOT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![owner, start, end], snapshot_from_row)?;
            rows.collect()
        })
    }

    // ---- check-in rolls ----

    pub fn find_serendipity_roll(&self, owner: &str, day: &str) -> Result<Option<SerendipityOutcome>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT kind, description, multiplier, buff_until, task_id
                 FROM serendipity_rolls WHERE owner = ?1 AND day = ?2",
                params![owner, day],
                serendipity_from_row,
            )
            .optional()
        })
    }

    pub fn insert_serendipity_roll(
        &self,
        owner: &str,
        day: &str,
        outcome: &SerendipityOutcome,
        rolled_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO serendipity_rolls (owner, day, kind, description, multiplier, buff_until, task_id, rolled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    owner,
                    day,
                    outcome.kind.as_str(),
                    outcome.description,
                    outcome.reward_multiplier,
                    outcome.buff_until.map(format_time),
                    outcome.spawned_task,
                    format_time(rolled_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Largest reward multiplier among the owner's unexpired buffs
    pub fn reward_boost(&self, owner: &str, now: DateTime<Utc>) -> Result<Option<f64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT MAX(multiplier) FROM serendipity_rolls
                 WHERE owner = ?1 AND buff_until IS NOT NULL AND buff_until > ?2 AND multiplier > 1.0",
                params![owner, format_time(now)],
                |row| row.get::<_, Option<f64>>(0),
            )
        })
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let table = match table {
            "users" | "tasks" | "achievements" | "shop_items" | "user_inventory" | "active_effects"
            | "growth_snapshots" | "serendipity_rolls" => table,
            other => return Err(QuestError::validation(format!("unknown table '{}'", other))),
        };
        self.with_conn(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        })
    }
}

/// Guard for one level of a (possibly nested) transaction.
///
/// Dropping an unfinished guard rolls back; failures there are only logged.
pub struct Transaction<'a> {
    store: &'a Store,
    finished: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl Transaction<'_> {
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.store.finish(true)
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.store.finish(false)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.store.finish(false) {
            warn!("rollback failed: {}", e);
        }
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let type_text: String = row.get(3)?;
    let deadline: String = row.get(5)?;
    let mut task = Task::new(
        row.get::<_, String>(1)?,
        parse_or(&type_text, TaskType::Custom, "task type"),
        1,
        parse_time_or_now(&deadline, "task deadline"),
    );
    task.id = row.get(0)?;
    task.description = row.get(2)?;
    task.set_difficulty(row.get(4)?);
    task.completed = row.get(6)?;
    task.coin_reward = row.get::<_, i64>(7)?.max(0);
    task.growth_reward = row.get::<_, i64>(8)?.max(0);
    task.attribute_reward = codec::decode_attributes(&row.get::<_, String>(9)?);
    task.set_bonus_streak(row.get(10)?);
    task.custom_settings = row.get(11)?;
    task.forgiveness_coupons = count(row.get(12)?);
    task.restore_progress(row.get(13)?, row.get(14)?);
    Ok(task)
}

fn achievement_from_row(row: &Row<'_>) -> rusqlite::Result<Achievement> {
    let kind: String = row.get(7)?;
    let reward_type: String = row.get(8)?;
    let mode: String = row.get(9)?;
    let conditions: String = row.get(17)?;
    let mut achievement = Achievement::new(
        row.get::<_, String>(1)?,
        row.get::<_, String>(3)?,
        parse_or(&kind, AchievementKind::Custom, "achievement type"),
        parse_or(&reward_type, RewardType::NoReward, "reward type"),
        codec::decode_conditions(&conditions),
    );
    achievement.id = row.get(0)?;
    achievement.creator = row.get(2)?;
    achievement.description = row.get(4)?;
    achievement.icon_path = row.get(5)?;
    achievement.display_color = row.get(6)?;
    achievement.progress_mode = parse_or(&mode, quest_common::ProgressMode::Milestone, "progress mode");
    achievement.reward_coins = row.get::<_, i64>(12)?.max(0);
    achievement.reward_attributes = codec::decode_reward_attributes(&row.get::<_, String>(13)?);
    achievement.reward_items = codec::decode_reward_items(&row.get::<_, String>(14)?);
    let completion: Option<String> = row.get(16)?;
    achievement.restore_unlock(row.get(15)?, completion.as_deref().and_then(parse_time));
    achievement.gallery_group = row.get(18)?;
    achievement.created_at = parse_time_or_now(&row.get::<_, String>(19)?, "created_at");
    achievement.special_metadata = row.get(20)?;
    Ok(achievement)
}

fn shop_item_from_row(row: &Row<'_>) -> rusqlite::Result<ShopItem> {
    let category: String = row.get(4)?;
    let mut item = ShopItem::new(
        row.get::<_, String>(1)?,
        parse_or(&category, ItemCategory::Physical, "item type"),
        row.get(5)?,
    );
    item.id = row.get(0)?;
    item.description = row.get(2)?;
    item.icon_path = row.get(3)?;
    item.purchase_limit = count(row.get(6)?);
    item.available = row.get(7)?;
    item.effect_description = row.get(8)?;
    item.effect_logic = row.get(9)?;
    item.prop_effect = PropEffect::from_column(&row.get::<_, String>(10)?);
    item.prop_duration_minutes = row.get(11)?;
    item.usage_conditions = row.get(12)?;
    item.physical_redeem = row.get(13)?;
    item.physical_notes = row.get(14)?;
    item.lucky_rewards = codec::decode_lucky_rules(&row.get::<_, String>(15)?);
    item.level_requirement = count(row.get(16)?);
    Ok(item)
}

fn inventory_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
    let purchase: String = row.get(6)?;
    let mut item = InventoryItem::new(
        row.get::<_, String>(1)?,
        row.get(2)?,
        parse_time_or_now(&purchase, "purchase_time"),
    );
    item.id = row.get(0)?;
    item.quantity = count(row.get(3)?);
    item.used_quantity = count(row.get(4)?);
    item.status = parse_or(&row.get::<_, String>(5)?, InventoryStatus::Unused, "inventory status");
    let expiration: Option<String> = row.get(7)?;
    item.expiration_time = expiration.as_deref().and_then(parse_time);
    item.payload = row.get(8)?;
    item.notes = row.get(9)?;
    Ok(item)
}

fn effect_from_row(row: &Row<'_>) -> rusqlite::Result<ActiveEffect> {
    Ok(ActiveEffect {
        effect: PropEffect::from_column(&row.get::<_, String>(0)?),
        stack: count(row.get(1)?),
        expires_at: parse_time(&row.get::<_, String>(2)?).unwrap_or(DateTime::<Utc>::MIN_UTC),
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<GrowthSnapshot> {
    Ok(GrowthSnapshot {
        id: row.get(0)?,
        owner: row.get(1)?,
        timestamp: parse_time_or_now(&row.get::<_, String>(2)?, "snapshot timestamp"),
        level: count(row.get(3)?),
        growth_points: row.get(4)?,
        attributes: AttributeSet {
            execution: row.get(5)?,
            perseverance: row.get(6)?,
            decision: row.get(7)?,
            knowledge: row.get(8)?,
            social: row.get(9)?,
            pride: row.get(10)?,
        },
        achievement_count: count(row.get(11)?),
        completed_tasks: count(row.get(12)?),
        failed_tasks: count(row.get(13)?),
        journal_entries: count(row.get(14)?),
    })
}

fn serendipity_from_row(row: &Row<'_>) -> rusqlite::Result<SerendipityOutcome> {
    let mut outcome = SerendipityOutcome::calm();
    outcome.kind = parse_or(&row.get::<_, String>(0)?, SerendipityKind::Calm, "serendipity kind");
    outcome.description = row.get(1)?;
    outcome.reward_multiplier = row.get(2)?;
    let until: Option<String> = row.get(3)?;
    outcome.buff_until = until.as_deref().and_then(parse_time);
    outcome.spawned_task = row.get(4)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quest_common::{Condition, ConditionType};
    use tempfile::tempdir;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test_quest.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_create_store() {
        let (store, _dir) = test_store();
        assert_eq!(store.count_rows("users").unwrap(), 0);
        assert!(store.count_rows("sqlite_master").is_err());
    }

    #[test]
    fn test_user_round_trip_and_duplicate() {
        let (store, _dir) = test_store();
        store.insert_user("ana", "hash").unwrap();
        assert!(matches!(store.insert_user("ana", "x"), Err(QuestError::Validation(_))));

        let mut user = store.find_user("ana").unwrap().unwrap();
        user.add_growth(450);
        user.add_coins(90);
        store.update_user(&user).unwrap();

        let reloaded = store.find_user("ana").unwrap().unwrap();
        assert_eq!(reloaded.level(), 3);
        assert_eq!(reloaded.coins(), 90);
        assert_eq!(reloaded.growth_points(), 450);
    }

    #[test]
    fn test_task_persistence() {
        let (store, _dir) = test_store();
        let deadline = parse_time("2026-12-01T00:00:00Z").unwrap();
        let mut task = Task::new("Essay", TaskType::Semester, 4, deadline)
            .with_rewards(200, 120)
            .with_goal(3);
        task.attribute_reward.decision = 2;
        task.id = store.insert_task(&task).unwrap();

        let loaded = store.find_task(task.id).unwrap().unwrap();
        assert_eq!(loaded, task);

        assert!(store.delete_task(task.id).unwrap());
        assert!(store.find_task(task.id).unwrap().is_none());
        assert!(matches!(store.update_task(&task), Err(QuestError::NotFound(_))));
    }

    #[test]
    fn test_achievement_month_count() {
        let (store, _dir) = test_store();
        let mut custom = Achievement::new(
            "ana",
            "Mine",
            AchievementKind::Custom,
            RewardType::WithReward,
            vec![Condition::new(ConditionType::CustomCounter, 5)],
        );
        custom.created_at = parse_time("2026-03-14T09:30:00Z").unwrap();
        store.insert_achievement(&custom).unwrap();
        custom.created_at = parse_time("2026-04-01T09:30:00Z").unwrap();
        store.insert_achievement(&custom).unwrap();

        assert_eq!(store.count_reward_customs_in_month("ana", "2026-03").unwrap(), 1);
        assert_eq!(store.count_reward_customs_in_month("bob", "2026-03").unwrap(), 0);
        assert!(store
            .find_achievement_id("ana", "Mine", AchievementKind::Custom)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_inventory_sum_and_expiry_query() {
        let (store, _dir) = test_store();
        let now = Utc::now();
        let mut item = InventoryItem::new("ana", 7, now);
        store.insert_inventory(&item).unwrap();
        item.expiration_time = Some(now - Duration::minutes(1));
        store.insert_inventory(&item).unwrap();

        assert_eq!(store.count_purchases("ana", 7).unwrap(), 2);
        assert_eq!(store.count_purchases("ana", 8).unwrap(), 0);
        assert_eq!(store.load_expired_inventory(now).unwrap().len(), 1);
    }

    #[test]
    fn test_nested_commit_only_outermost_writes() {
        let (store, _dir) = test_store();
        let outer = store.begin().unwrap();
        let inner = store.begin().unwrap();
        store.insert_user("ana", "h").unwrap();
        assert_eq!(store.transaction_depth(), 2);
        inner.commit().unwrap();
        assert_eq!(store.transaction_depth(), 1);
        outer.rollback().unwrap();
        assert_eq!(store.transaction_depth(), 0);
        assert!(store.find_user("ana").unwrap().is_none());
    }

    #[test]
    fn test_inner_rollback_aborts_outer() {
        let (store, _dir) = test_store();
        let outer = store.begin().unwrap();
        store.insert_user("ana", "h").unwrap();
        {
            let inner = store.begin().unwrap();
            inner.rollback().unwrap();
        }
        assert!(store.begin().is_err());
        assert!(matches!(outer.commit(), Err(QuestError::Persistence(_))));
        assert_eq!(store.transaction_depth(), 0);
        assert!(store.find_user("ana").unwrap().is_none());
    }

    #[test]
    fn test_dropped_guard_rolls_back() {
        let (store, _dir) = test_store();
        {
            let _tx = store.begin().unwrap();
            store.insert_user("ana", "h").unwrap();
        }
        assert!(store.find_user("ana").unwrap().is_none());
        assert_eq!(store.transaction_depth(), 0);
    }

    #[test]
    fn test_effects_replace_and_expire() {
        let (store, _dir) = test_store();
        let now = parse_time("2026-03-02T08:00:00Z").unwrap();
        let rest = ActiveEffect {
            effect: PropEffect::RestDay,
            stack: 2,
            expires_at: now + Duration::hours(2),
        };
        let card = ActiveEffect {
            effect: PropEffect::DoubleExpCard,
            stack: 1,
            expires_at: now - Duration::minutes(1),
        };
        store.save_effects("ana", &[rest, card]).unwrap();
        assert_eq!(store.load_effects("ana").unwrap().len(), 2);
        assert_eq!(store.effect_holders(PropEffect::RestDay, now).unwrap(), vec!["ana".to_string()]);
        assert!(store.effect_holders(PropEffect::DoubleExpCard, now).unwrap().is_empty());

        assert_eq!(store.delete_expired_effects(now).unwrap(), 1);
        assert_eq!(store.load_effects("ana").unwrap(), vec![rest]);

        store.save_effects("ana", &[]).unwrap();
        assert_eq!(store.count_rows("active_effects").unwrap(), 0);
    }

    #[test]
    fn test_snapshot_range_query() {
        let (store, _dir) = test_store();
        store.insert_user("ana", "h").unwrap();
        let user = store.find_user("ana").unwrap().unwrap();
        for day in 1..=3 {
            let at = parse_time(&format!("2026-03-0{}T08:00:00Z", day)).unwrap();
            store.insert_snapshot(&GrowthSnapshot::of(&user, at, day)).unwrap();
        }
        let all = store.load_snapshots("ana", None, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].journal_entries, 3);

        let from = parse_time("2026-03-02T00:00:00Z");
        let to = parse_time("2026-03-02T23:59:59Z");
        let window = store.load_snapshots("ana", from, to).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].owner, "ana");
        assert!(store.load_snapshots("bob", None, None).unwrap().is_empty());
    }

    #[test]
    fn test_one_roll_per_day() {
        let (store, _dir) = test_store();
        let now = parse_time("2026-03-02T08:00:00Z").unwrap();
        let mut buff = SerendipityOutcome::calm();
        buff.kind = SerendipityKind::RewardBuff;
        buff.reward_multiplier = 1.2;
        buff.buff_until = Some(now + Duration::days(1));
        store.insert_serendipity_roll("ana", "2026-03-02", &buff, now).unwrap();
        assert!(store.insert_serendipity_roll("ana", "2026-03-02", &buff, now).is_err());

        assert_eq!(store.find_serendipity_roll("ana", "2026-03-02").unwrap(), Some(buff));
        assert_eq!(store.reward_boost("ana", now).unwrap(), Some(1.2));
        assert_eq!(store.reward_boost("ana", now + Duration::days(2)).unwrap(), None);
        assert_eq!(store.reward_boost("bob", now).unwrap(), None);
    }

    #[test]
    fn test_out_of_range_counters_clamp() {
        let (store, _dir) = test_store();
        let task = Task::new("Essay", TaskType::Daily, 1, Utc::now());
        let id = store.insert_task(&task).unwrap();
        store
            .execute_batch(&format!(
                "UPDATE tasks SET forgiveness_coupons = {} WHERE id = {}",
                i64::MAX,
                id
            ))
            .unwrap();
        assert_eq!(store.find_task(id).unwrap().unwrap().forgiveness_coupons, u32::MAX);
        store
            .execute_batch(&format!("UPDATE tasks SET forgiveness_coupons = -4 WHERE id = {}", id))
            .unwrap();
        assert_eq!(store.find_task(id).unwrap().unwrap().forgiveness_coupons, 0);
    }
}
