//! Questline Common - domain model shared by the engine and the CLI.
//!
//! Users, tasks, achievements, shop items, inventory, effects and growth
//! history, daily check-in surprises, plus the blob codec, the typed event bus, errors and configuration.

/// Text round-trip (`as_str`, `Display`, `FromStr`) for fieldless enums
/// stored as their variant name.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => stringify!($variant),)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::error::QuestError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                $(
                    if s.trim().eq_ignore_ascii_case(stringify!($variant)) {
                        return Ok($ty::$variant);
                    }
                )+
                Err($crate::error::QuestError::validation(format!(
                    "unknown {} '{}'",
                    stringify!($ty),
                    s
                )))
            }
        }
    };
}

pub mod achievement;
pub mod codec;
pub mod config;
pub mod effects;
pub mod error;
pub mod events;
pub mod growth;
pub mod inventory_item;
pub mod serendipity;
pub mod shop_item;
pub mod task;
pub mod user;

pub use achievement::{
    Achievement, AchievementKind, Condition, ConditionType, ProgressMode, RewardType,
};
pub use config::QuestConfig;
pub use effects::{ActiveEffect, EffectStacks, MAX_EFFECT_STACK};
pub use error::{QuestError, Result};
pub use events::EventBus;
pub use growth::GrowthSnapshot;
pub use inventory_item::{InventoryItem, InventoryStatus};
pub use serendipity::{SerendipityKind, SerendipityOutcome};
pub use shop_item::{ItemCategory, LuckyReward, LuckyRewardKind, PropEffect, ShopItem};
pub use task::{FailureOutcome, Task, TaskReward, TaskType};
pub use user::{level_from_growth, AttributeSet, ProgressStats, TaskCategory, User};
