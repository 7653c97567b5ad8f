//! Versioned text encodings for the blob columns.
//!
//! Decoding is tolerant: malformed or unknown segments are skipped and
//! missing numbers default to zero, so one bad field never hides a record.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::achievement::{Condition, ConditionType};
use crate::shop_item::{LuckyReward, LuckyRewardKind};
use crate::user::{AttributeSet, ProgressStats};

pub const CODEC_VERSION: u32 = 1;

const VERSION_KEY: &str = "v";

/// Split `key=value;key=value` into pairs, skipping malformed segments
fn pairs(blob: &str) -> impl Iterator<Item = (&str, &str)> {
    blob.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| match segment.split_once('=') {
            Some((key, value)) => Some((key.trim(), value.trim())),
            None => {
                warn!("skipping malformed blob segment '{}'", segment);
                None
            }
        })
}

fn number(key: &str, value: &str) -> i64 {
    value.parse().unwrap_or_else(|_| {
        warn!("blob field '{}' has non-numeric value '{}', using 0", key, value);
        0
    })
}

/// Attribute values saturate at the `i32` range instead of wrapping
fn attribute(key: &str, value: &str) -> i32 {
    let n = number(key, value);
    i32::try_from(n).unwrap_or_else(|_| {
        warn!("blob field '{}' value {} is out of range, saturating", key, n);
        if n < 0 {
            i32::MIN
        } else {
            i32::MAX
        }
    })
}

/// Non-negative counters; negatives read as zero, overflow saturates
fn counter(key: &str, value: &str) -> u32 {
    u32::try_from(number(key, value).max(0)).unwrap_or_else(|_| {
        warn!("blob counter '{}' is out of range, saturating", key);
        u32::MAX
    })
}

fn join(fields: Vec<String>) -> String {
    fields.join(";")
}

/// Persisted user state that is not a column of its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserBlob {
    pub growth_points: i64,
    pub attributes: AttributeSet,
    pub progress: ProgressStats,
}

pub fn encode_user_blob(blob: &UserBlob) -> String {
    let mut fields = vec![
        format!("{}={}", VERSION_KEY, CODEC_VERSION),
        format!("growth={}", blob.growth_points),
    ];
    fields.extend(
        blob.attributes
            .fields()
            .iter()
            .map(|(name, value)| format!("{}={}", name, value)),
    );
    let p = &blob.progress;
    fields.push(format!("achievements={}", p.achievements_unlocked));
    fields.push(format!("tasks_total={}", p.total_tasks_completed));
    fields.push(format!("tasks_academic={}", p.academic_tasks_completed));
    fields.push(format!("tasks_social={}", p.social_tasks_completed));
    fields.push(format!("tasks_personal={}", p.personal_tasks_completed));
    fields.push(format!("tasks_failed={}", p.total_tasks_failed));
    fields.push(format!("attribute_spent={}", p.attribute_points_spent));
    join(fields)
}

pub fn decode_user_blob(blob: &str) -> UserBlob {
    let mut decoded = UserBlob::default();
    for (key, value) in pairs(blob) {
        let p = &mut decoded.progress;
        match key {
            VERSION_KEY => {}
            "growth" => decoded.growth_points = number(key, value).max(0),
            "achievements" => p.achievements_unlocked = counter(key, value),
            "tasks_total" => p.total_tasks_completed = counter(key, value),
            "tasks_academic" => p.academic_tasks_completed = counter(key, value),
            "tasks_social" => p.social_tasks_completed = counter(key, value),
            "tasks_personal" => p.personal_tasks_completed = counter(key, value),
            "tasks_failed" => p.total_tasks_failed = counter(key, value),
            "attribute_spent" => p.attribute_points_spent = counter(key, value),
            other => {
                if !decoded.attributes.set_field(other, attribute(other, value)) {
                    warn!("unknown user blob key '{}'", other);
                }
            }
        }
    }
    decoded
}

/// `key=value` form used by task attribute rewards; zero fields are omitted
pub fn encode_attributes(attributes: &AttributeSet) -> String {
    join(
        attributes
            .fields()
            .iter()
            .filter(|(_, value)| *value != 0)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect(),
    )
}

pub fn decode_attributes(blob: &str) -> AttributeSet {
    let mut attributes = AttributeSet::default();
    for (key, value) in pairs(blob) {
        if key == VERSION_KEY {
            continue;
        }
        if !attributes.set_field(key, attribute(key, value)) {
            warn!("unknown attribute key '{}'", key);
        }
    }
    attributes
}

/// Ordinal CSV in field order: execution, perseverance, decision, knowledge, social, pride
pub fn encode_reward_attributes(attributes: &AttributeSet) -> String {
    attributes
        .fields()
        .iter()
        .map(|(_, value)| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn decode_reward_attributes(blob: &str) -> AttributeSet {
    let mut attributes = AttributeSet::default();
    let names = AttributeSet::default().fields().map(|(name, _)| name);
    for (name, raw) in names.iter().zip(blob.split(',')) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        attributes.set_field(name, attribute(name, raw));
    }
    attributes
}

/// Segments of `ordinal,target,current,metadata`
pub fn encode_conditions(conditions: &[Condition]) -> String {
    let mut segments = vec![format!("{}={}", VERSION_KEY, CODEC_VERSION)];
    segments.extend(conditions.iter().map(|c| {
        format!(
            "{},{},{},{}",
            c.condition_type.ordinal(),
            c.target,
            c.current,
            c.metadata.replace(';', ",")
        )
    }));
    join(segments)
}

/// Falls back to a single CompleteAnyTask condition when nothing decodes
pub fn decode_conditions(blob: &str) -> Vec<Condition> {
    let mut conditions = Vec::new();
    for segment in blob.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        if segment.starts_with("v=") {
            continue;
        }
        let mut parts = segment.splitn(4, ',');
        let ordinal = parts.next().and_then(|p| p.trim().parse::<i64>().ok());
        let Some(condition_type) = ordinal.and_then(ConditionType::from_ordinal) else {
            warn!("skipping condition segment with unknown type '{}'", segment);
            continue;
        };
        let target = parts
            .next()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .max(1);
        let current = parts
            .next()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .clamp(0, target);
        let metadata = parts.next().unwrap_or("").trim().to_string();
        conditions.push(Condition {
            condition_type,
            target,
            current,
            metadata,
        });
    }
    if conditions.is_empty() {
        conditions.push(Condition::new(ConditionType::CompleteAnyTask, 1));
    }
    conditions
}

pub fn encode_reward_items(items: &[String]) -> String {
    items
        .iter()
        .map(|item| item.replace('|', "/"))
        .collect::<Vec<_>>()
        .join("|")
}

pub fn decode_reward_items(blob: &str) -> Vec<String> {
    blob.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LuckyTable {
    #[serde(default)]
    entries: Vec<LuckyReward>,
}

pub fn encode_lucky_rules(rewards: &[LuckyReward]) -> String {
    let table = LuckyTable {
        entries: rewards.to_vec(),
    };
    serde_json::to_string(&table).unwrap_or_else(|_| "{\"entries\":[]}".to_string())
}

pub fn decode_lucky_rules(json: &str) -> Vec<LuckyReward> {
    if json.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<LuckyTable>(json) {
        Ok(table) => table.entries,
        Err(e) => {
            warn!("ignoring malformed lucky bag rules: {}", e);
            Vec::new()
        }
    }
}

/// Result of opening a lucky bag, stored on the inventory row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuckyRollPayload {
    #[serde(rename = "type")]
    pub kind: LuckyRewardKind,
    pub amount: i64,
    pub desc: String,
}

impl From<&LuckyReward> for LuckyRollPayload {
    fn from(reward: &LuckyReward) -> Self {
        Self {
            kind: reward.kind,
            amount: reward.amount,
            desc: reward.description.clone(),
        }
    }
}
