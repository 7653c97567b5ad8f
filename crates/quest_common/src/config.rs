//! Questline configuration.
//!
//! Lives in `$XDG_CONFIG_HOME/questline/config.toml` unless a path is given.
//! A missing file means defaults; a malformed one is an error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{QuestError, Result};

const APP_DIR: &str = "questline";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    data_dir().join("questline.db")
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopSettings {
    /// Baseline unit value all pricing formulas scale from
    #[serde(default = "default_baseline_price")]
    pub baseline_price: i64,
}

fn default_baseline_price() -> i64 {
    60
}

impl ShopSettings {
    pub fn effective_baseline(&self) -> i64 {
        self.baseline_price.max(1)
    }
}

impl Default for ShopSettings {
    fn default() -> Self {
        Self {
            baseline_price: default_baseline_price(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectSettings {
    /// Used when a prop declares no duration
    #[serde(default = "default_effect_duration")]
    pub default_duration_minutes: i64,
}

fn default_effect_duration() -> i64 {
    1440 // one day
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            default_duration_minutes: default_effect_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// How often expired inventory is swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_minutes: u64,
}

fn default_tick_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

impl SchedulerSettings {
    /// Clamp tick interval to 1-3600 seconds
    pub fn effective_tick_interval(&self) -> u64 {
        self.tick_interval_secs.clamp(1, 3600)
    }

    pub fn effective_sweep_interval(&self) -> u64 {
        self.sweep_interval_minutes.max(1)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            sweep_interval_minutes: default_sweep_interval(),
        }
    }
}

/// Daily check-in odds; each roll is tried in order and the first hit wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerendipitySettings {
    #[serde(default = "default_buff_chance")]
    pub buff_chance: f64,

    #[serde(default = "default_task_chance")]
    pub task_chance: f64,

    #[serde(default = "default_small_reward_chance")]
    pub small_reward_chance: f64,
}

fn default_buff_chance() -> f64 {
    0.1
}

fn default_task_chance() -> f64 {
    0.05
}

fn default_small_reward_chance() -> f64 {
    0.2
}

impl SerendipitySettings {
    /// Chances outside 0.0-1.0 (or NaN) are clamped
    pub fn clamped(&self) -> Self {
        let clamp = |p: f64| if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        Self {
            buff_chance: clamp(self.buff_chance),
            task_chance: clamp(self.task_chance),
            small_reward_chance: clamp(self.small_reward_chance),
        }
    }
}

impl Default for SerendipitySettings {
    fn default() -> Self {
        Self {
            buff_chance: default_buff_chance(),
            task_chance: default_task_chance(),
            small_reward_chance: default_small_reward_chance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalSettings {
    #[serde(default = "default_journal_enabled")]
    pub enabled: bool,

    #[serde(default = "default_journal_path")]
    pub path: PathBuf,

    /// Entries kept after rotation
    #[serde(default = "default_journal_max_entries")]
    pub max_entries: usize,
}

fn default_journal_enabled() -> bool {
    true
}

fn default_journal_path() -> PathBuf {
    data_dir().join("journal.jsonl")
}

fn default_journal_max_entries() -> usize {
    10_000
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            enabled: default_journal_enabled(),
            path: default_journal_path(),
            max_entries: default_journal_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub shop: ShopSettings,
    #[serde(default)]
    pub effects: EffectSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub serendipity: SerendipitySettings,
    #[serde(default)]
    pub journal: JournalSettings,
    #[serde(default)]
    pub logging: LogSettings,
}

impl QuestConfig {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| QuestError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| QuestError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Config rooted in one directory; handy for tests and portable installs
    pub fn in_dir(dir: &Path) -> Self {
        let mut config = Self::default();
        config.store.path = dir.join("questline.db");
        config.journal.path = dir.join("journal.jsonl");
        config
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".config"))
        .join(APP_DIR)
        .join(CONFIG_FILE)
}

pub fn data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".local").join("share"))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = QuestConfig::default();
        assert_eq!(config.shop.baseline_price, 60);
        assert_eq!(config.effects.default_duration_minutes, 1440);
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.scheduler.sweep_interval_minutes, 30);
        assert_eq!(config.journal.max_entries, 10_000);
        assert!(config.journal.enabled);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.serendipity.buff_chance, 0.1);
        assert_eq!(config.serendipity.task_chance, 0.05);
        assert_eq!(config.serendipity.small_reward_chance, 0.2);
    }

    #[test]
    fn test_serendipity_odds_clamped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[serendipity]\nbuff_chance = 1.7\ntask_chance = -0.2\n").unwrap();

        let odds = QuestConfig::load_from(&path).unwrap().serendipity.clamped();
        assert_eq!(odds.buff_chance, 1.0);
        assert_eq!(odds.task_chance, 0.0);
        assert_eq!(odds.small_reward_chance, 0.2);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[shop]\nbaseline_price = 80\n\n[scheduler]\ntick_interval_secs = 0\n").unwrap();

        let config = QuestConfig::load_from(&path).unwrap();
        assert_eq!(config.shop.baseline_price, 80);
        assert_eq!(config.scheduler.effective_tick_interval(), 1);
        assert_eq!(config.scheduler.sweep_interval_minutes, 30);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = QuestConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.shop.baseline_price, 60);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[shop\nbaseline_price = ").unwrap();
        assert!(matches!(QuestConfig::load_from(&path), Err(QuestError::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let mut config = QuestConfig::in_dir(dir.path());
        config.journal.max_entries = 50;
        let path = dir.path().join("nested").join("config.toml");
        config.save_to(&path).unwrap();

        let loaded = QuestConfig::load_from(&path).unwrap();
        assert_eq!(loaded.journal.max_entries, 50);
        assert_eq!(loaded.store.path, dir.path().join("questline.db"));
    }
}
