//! Two engines on one database, the way the daemon and a CLI call share it.

use chrono::{Duration, Utc};
use tempfile::TempDir;

use quest_common::{PropEffect, QuestConfig, ShopItem, Task, TaskType};
use questd::Engine;

fn daemon_and_cli() -> (Engine, Engine, QuestConfig, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = QuestConfig::in_dir(dir.path());
    let daemon = Engine::open(&config).unwrap();
    let cli = Engine::open(&config).unwrap();
    cli.register("mei", "pw").unwrap();
    cli.login("mei", "pw").unwrap();
    (daemon, cli, config, dir)
}

fn tomorrow() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::days(1)
}

#[test]
fn daemon_reset_covers_tasks_created_by_the_cli() {
    let (daemon, cli, config, _dir) = daemon_and_cli();
    let task = cli
        .create_task(Task::new("Stretch", TaskType::Daily, 1, tomorrow()).with_rewards(10, 10))
        .unwrap();
    cli.complete_task(task.id).unwrap();

    let summary = daemon.reset_daily_at(Utc::now()).unwrap();
    assert_eq!(summary.reset, 1);
    let reset = daemon.tasks().task(task.id).unwrap();
    assert!(!reset.completed);
    assert_eq!(reset.bonus_streak(), 1);

    let next_call = Engine::open(&config).unwrap();
    let stored = next_call.tasks().task(task.id).unwrap();
    assert!(!stored.completed);
    assert_eq!(stored.bonus_streak(), 1);
}

#[test]
fn daemon_deadline_check_keeps_later_cli_writes() {
    let (daemon, cli, _config, _dir) = daemon_and_cli();
    daemon.enforce_deadlines_at(Utc::now()).unwrap();

    let essay = cli
        .create_task(Task::new("Essay", TaskType::Semester, 3, Utc::now() - Duration::hours(1)).with_streak(2))
        .unwrap();
    let reading = cli
        .create_task(Task::new("Reading", TaskType::Daily, 1, tomorrow()))
        .unwrap();

    assert_eq!(daemon.enforce_deadlines_at(Utc::now()).unwrap(), 1);
    assert_eq!(daemon.tasks().tasks().unwrap().len(), 2);
    assert_eq!(cli.store().find_task(essay.id).unwrap().unwrap().bonus_streak(), 0);
    assert!(cli.store().find_task(reading.id).unwrap().is_some());
}

#[test]
fn rest_day_used_in_the_cli_protects_the_daemon_reset() {
    let (daemon, cli, _config, _dir) = daemon_and_cli();
    let changes = cli.ledger().add_coins(500).unwrap();
    cli.ledger().announce(&changes).unwrap();
    let rest = cli
        .create_shop_item(ShopItem::prop("Rest day", PropEffect::RestDay, 60))
        .unwrap();
    let bought = cli.purchase(rest.id, 1).unwrap();
    cli.use_inventory_item(bought.granted[0].id).unwrap();
    let open = cli
        .create_task(Task::new("Gym", TaskType::Daily, 2, tomorrow()).with_streak(3))
        .unwrap();

    let summary = daemon.reset_daily_at(Utc::now()).unwrap();
    assert!(summary.streaks_kept);
    assert_eq!(cli.store().find_task(open.id).unwrap().unwrap().bonus_streak(), 3);
    assert!(!cli.inventory().has_effect_token("mei", PropEffect::RestDay).unwrap());

    let summary = daemon.reset_daily_at(Utc::now()).unwrap();
    assert!(!summary.streaks_kept);
    assert_eq!(cli.store().find_task(open.id).unwrap().unwrap().bonus_streak(), 0);
}

#[test]
fn forgiveness_token_from_one_engine_is_seen_by_another() {
    let (_daemon, cli, config, _dir) = daemon_and_cli();
    cli.inventory()
        .register_effect("mei", PropEffect::ForgivenessCoupon, 60, 1)
        .unwrap();
    let task = cli
        .create_task(Task::new("Gym", TaskType::Daily, 2, tomorrow()).with_streak(2))
        .unwrap();

    let other = Engine::open(&config).unwrap();
    other.login("mei", "pw").unwrap();
    assert_eq!(other.record_failure(task.id, true).unwrap(), quest_common::FailureOutcome::Forgiven);
    assert!(!cli.inventory().has_effect_token("mei", PropEffect::ForgivenessCoupon).unwrap());
    assert_eq!(other.snapshot().unwrap().user.progress.total_tasks_failed, 0);
}
