//! Built-in system achievements, seeded once per owner.

use quest_common::{
    Achievement, AchievementKind, AttributeSet, Condition, ConditionType, ProgressMode, RewardType,
    TaskType,
};

pub const SYSTEM_CREATOR: &str = "system";

struct Template {
    name: &'static str,
    description: &'static str,
    icon: &'static str,
    color: &'static str,
    group: &'static str,
    mode: ProgressMode,
    condition: fn() -> Condition,
    coins: i64,
    attributes: AttributeSet,
    items: &'static [&'static str],
}

fn templates() -> [Template; 4] {
    [
        Template {
            name: "Campus Newcomer",
            description: "Reach level 3 and settle into the rhythm of campus life",
            icon: "icons/rookie.png",
            color: "#4CAF50",
            group: "Freshman Welcome",
            mode: ProgressMode::Milestone,
            condition: || Condition::new(ConditionType::ReachLevel, 3),
            coins: 50,
            attributes: AttributeSet { pride: 2, ..Default::default() },
            items: &[],
        },
        Template {
            name: "Pride Ambassador",
            description: "Raise pride to 20",
            icon: "icons/pride.png",
            color: "#FFC107",
            group: "Spirit",
            mode: ProgressMode::Incremental,
            condition: || Condition::new(ConditionType::ReachPride, 20),
            coins: 80,
            attributes: AttributeSet { pride: 5, ..Default::default() },
            items: &["Heritage Badge"],
        },
        Template {
            name: "Task Hunter",
            description: "Complete 10 tasks of any kind",
            icon: "icons/tasks.png",
            color: "#03A9F4",
            group: "Practice",
            mode: ProgressMode::Incremental,
            condition: || Condition::new(ConditionType::CompleteAnyTask, 10),
            coins: 0,
            attributes: AttributeSet::default(),
            items: &[],
        },
        Template {
            name: "Weekly Planner",
            description: "Complete 5 weekly tasks",
            icon: "icons/weekly.png",
            color: "#9C27B0",
            group: "Practice",
            mode: ProgressMode::Incremental,
            condition: || Condition::new(ConditionType::CompleteTaskType, 5).tagged(TaskType::Weekly.as_str()),
            coins: 40,
            attributes: AttributeSet { execution: 1, pride: 1, ..Default::default() },
            items: &[],
        },
    ]
}

/// Fresh copies of the system achievements for `owner`
pub fn system_achievements(owner: &str) -> Vec<Achievement> {
    templates()
        .into_iter()
        .map(|t| {
            let reward_type = if t.coins > 0 || !t.attributes.is_zero() {
                RewardType::WithReward
            } else {
                RewardType::NoReward
            };
            let mut achievement = Achievement::new(
                owner,
                t.name,
                AchievementKind::System,
                reward_type,
                vec![(t.condition)()],
            );
            achievement.creator = SYSTEM_CREATOR.to_string();
            achievement.description = t.description.to_string();
            achievement.icon_path = t.icon.to_string();
            achievement.display_color = t.color.to_string();
            achievement.gallery_group = t.group.to_string();
            achievement.progress_mode = t.mode;
            achievement.reward_coins = t.coins;
            achievement.reward_attributes = t.attributes;
            achievement.reward_items = t.items.iter().map(|s| s.to_string()).collect();
            achievement
        })
        .collect()
}
