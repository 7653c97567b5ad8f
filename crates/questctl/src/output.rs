//! Terminal rendering - plain ASCII, color for status only

use owo_colors::OwoColorize;

use quest_common::{Achievement, GrowthSnapshot, InventoryItem, InventoryStatus, ShopItem, Task};
use questd::serendipity::CheckIn;
use questd::tasks::CompletionReport;
use questd::Snapshot;

const SEPARATOR: &str = "------------------------------------------------------------";

pub fn success(message: &str) {
    println!("{} {}", "[OK]".bright_green(), message);
}

pub fn note(message: &str) {
    println!("{} {}", "[NOTE]".cyan(), message);
}

pub fn warning(message: &str) {
    println!("{} {}", "[WARNING]".yellow(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red(), message.red());
}

fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", SEPARATOR.dimmed());
}

pub fn status(snapshot: &Snapshot) {
    let user = &snapshot.user;
    header(&format!("{} - level {}", user.username, user.level()));
    println!("  Growth      {}", user.growth_points());
    println!("  Coins       {}", user.coins().bright_yellow());
    println!("  Attributes  {}", user.attribute_summary());
    println!("  Unassigned  {} points", snapshot.available_attribute_points);
    println!(
        "  Completed   {} tasks, {} achievements",
        user.progress.total_tasks_completed, user.progress.achievements_unlocked
    );

    let unlocked = snapshot.achievements.iter().filter(|a| a.is_unlocked()).count();
    let open = snapshot.tasks.iter().filter(|t| !t.completed).count();
    println!("  Tasks       {} open of {}", open, snapshot.tasks.len());
    println!("  Gallery     {}/{} unlocked", unlocked, snapshot.achievements.len());

    let stats = &snapshot.inventory_statistics;
    println!(
        "  Inventory   {} items ({} expiring soon)",
        stats.total,
        if stats.expiring_soon > 0 {
            stats.expiring_soon.yellow().to_string()
        } else {
            stats.expiring_soon.to_string()
        }
    );

    if let Some(check_in) = &snapshot.check_in {
        println!("  Today       {}", check_in.description);
    }

    if !snapshot.active_effects.is_empty() {
        println!();
        println!("  Active effects:");
        for effect in &snapshot.active_effects {
            println!(
                "    * {} x{} until {}",
                effect.effect.cyan(),
                effect.stack,
                effect.expires_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
    }
    println!();
}

pub fn tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        note("No tasks");
        return;
    }
    header("Tasks");
    for task in tasks {
        let state = if task.completed {
            "[DONE]".bright_green().to_string()
        } else {
            "[OPEN]".yellow().to_string()
        };
        println!(
            "  {:>4} {} {:<28} {:<8} {}* {}/{} streak {}  due {}",
            task.id,
            state,
            task.name,
            task.task_type,
            task.difficulty(),
            task.progress_value(),
            task.progress_goal(),
            task.bonus_streak(),
            task.deadline.format("%Y-%m-%d")
        );
    }
    println!();
}

pub fn completion(report: &CompletionReport) {
    success(&format!(
        "Task {} completed: +{} coins, +{} growth (streak {})",
        report.task_id, report.reward.coins, report.reward.growth, report.streak
    ));
    if report.growth_multiplier > 1.0 {
        note(&format!("Growth multiplied x{}", report.growth_multiplier));
    }
    if report.reward_boost > 1.0 {
        note(&format!("Check-in buff x{}", report.reward_boost));
    }
    if report.achievement_credits > 0 {
        note(&format!("{} achievement credit(s) earned", report.achievement_credits));
    }
}

pub fn shop_items(items: &[ShopItem]) {
    if items.is_empty() {
        note("The shop is empty");
        return;
    }
    header("Shop");
    for item in items {
        let limit = if item.has_limit() {
            format!("limit {}", item.purchase_limit)
        } else {
            String::new()
        };
        let name = if item.available {
            item.name.clone()
        } else {
            item.name.dimmed().to_string()
        };
        println!(
            "  {:>4} {:<28} {:<9} {:>6} coins  lvl {:<3} {}",
            item.id,
            name,
            item.category,
            item.price.bright_yellow(),
            item.level_requirement,
            limit
        );
    }
    println!();
}

pub fn inventory(items: &[InventoryItem]) {
    if items.is_empty() {
        note("Inventory is empty");
        return;
    }
    header("Inventory");
    for item in items {
        let status = match item.status {
            InventoryStatus::Unused => item.status.green().to_string(),
            InventoryStatus::Active => item.status.cyan().to_string(),
            InventoryStatus::Consumed => item.status.dimmed().to_string(),
            InventoryStatus::Expired => item.status.red().to_string(),
        };
        let expires = item
            .expiration_time
            .map(|t| format!("expires {}", t.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        println!(
            "  {:>4} item #{:<4} {:<9} {}/{} used  {}",
            item.id, item.item_id, status, item.used_quantity, item.quantity, expires
        );
        if !item.notes.is_empty() {
            println!("       {}", item.notes.dimmed());
        }
    }
    println!();
}

pub fn achievements(achievements: &[Achievement]) {
    if achievements.is_empty() {
        note("No achievements");
        return;
    }
    header("Achievements");
    for a in achievements {
        let mark = if a.is_unlocked() {
            "[X]".bright_green().to_string()
        } else {
            "[ ]".to_string()
        };
        println!(
            "  {:>4} {} {:<28} {:>5.1}%  {}/{}  {}",
            a.id,
            mark,
            a.name,
            a.progress_percent(),
            a.progress_value(),
            a.progress_goal(),
            a.gallery_group.dimmed()
        );
    }
    println!();
}

pub fn check_in(check_in: &CheckIn) {
    let outcome = &check_in.outcome;
    if !check_in.fresh {
        note(&format!("Already checked in for {}: {}", check_in.day, outcome.description));
        return;
    }
    if outcome.triggered() {
        println!("{} {}", "[SURPRISE]".bright_magenta(), outcome.description);
    } else {
        success(&format!("Checked in for {}: {}", check_in.day, outcome.description));
    }
    if let Some(until) = outcome.buff_until {
        note(&format!("Buff lasts until {}", until.format("%Y-%m-%d %H:%M UTC")));
    }
    if let Some(id) = outcome.spawned_task {
        note(&format!("New task id {}", id));
    }
}

pub fn timeline(snapshots: &[GrowthSnapshot]) {
    if snapshots.is_empty() {
        note("No growth snapshots yet");
        return;
    }
    header("Growth history");
    for s in snapshots {
        println!(
            "  {}  level {:>3}  growth {:>6}  tasks {:>4} done {:>3} failed  {} achievements",
            s.timestamp.format("%Y-%m-%d %H:%M"),
            s.level,
            s.growth_points,
            s.completed_tasks,
            s.failed_tasks,
            s.achievement_count
        );
    }
    println!();
}
