//! Rollback behaviour of multi-step commands against a real SQLite file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use quest_common::{ItemCategory, QuestConfig, QuestError, ShopItem, Task, TaskType};
use questd::store::Store;
use questd::Engine;

fn engine_with_coins(coins: i64) -> (Engine, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(&QuestConfig::in_dir(dir.path())).unwrap();
    engine.register("kai", "pw").unwrap();
    engine.login("kai", "pw").unwrap();
    let _ = engine.ledger().add_coins(coins).unwrap();
    (engine, dir)
}

fn stored_coins(engine: &Engine) -> i64 {
    engine.store().find_user("kai").unwrap().unwrap().coins()
}

#[test]
fn failed_body_restores_balance() {
    let (engine, _dir) = engine_with_coins(500);
    let result: Result<(), QuestError> = engine.ledger().atomically(|| {
        let _ = engine.ledger().spend_coins(200)?;
        Err(QuestError::validation("abort"))
    });

    assert!(matches!(result, Err(QuestError::Validation(_))));
    assert_eq!(engine.ledger().current().unwrap().coins(), 500);
    assert_eq!(stored_coins(&engine), 500);
    assert_eq!(engine.store().transaction_depth(), 0);
}

#[test]
fn purchase_rolls_back_debit_when_inventory_write_fails() {
    let (engine, _dir) = engine_with_coins(1000);
    let mug = engine
        .create_shop_item(ShopItem::new("Mug", ItemCategory::Physical, 300))
        .unwrap();
    engine
        .store()
        .execute_batch(
            "CREATE TRIGGER block_inventory BEFORE INSERT ON user_inventory \
             BEGIN SELECT RAISE(ABORT, 'inventory full'); END;",
        )
        .unwrap();

    let result = engine.purchase(mug.id, 2);
    assert!(matches!(result, Err(QuestError::Persistence(_))));
    assert_eq!(engine.ledger().current().unwrap().coins(), 1000);
    assert_eq!(stored_coins(&engine), 1000);
    assert!(engine.inventory().list_by_owner("kai").unwrap().is_empty());

    // Store is usable again afterwards
    engine.store().execute_batch("DROP TRIGGER block_inventory").unwrap();
    assert!(engine.purchase(mug.id, 1).unwrap().success);
    assert_eq!(stored_coins(&engine), 700);
}

#[test]
fn completion_stays_pending_when_reward_write_fails() {
    let (engine, _dir) = engine_with_coins(0);
    let task = engine
        .create_task(
            Task::new("Lab report", TaskType::Daily, 2, Utc::now() + chrono::Duration::days(1))
                .with_rewards(40, 40),
        )
        .unwrap();
    engine
        .store()
        .execute_batch(
            "CREATE TRIGGER freeze_users BEFORE UPDATE ON users \
             BEGIN SELECT RAISE(ABORT, 'frozen'); END;",
        )
        .unwrap();

    assert!(engine.complete_task(task.id).is_err());
    let cached = engine.tasks().task(task.id).unwrap();
    assert!(!cached.completed);
    assert_eq!(cached.bonus_streak(), 0);
    let stored = engine.store().find_task(task.id).unwrap().unwrap();
    assert!(!stored.completed);
    assert_eq!(engine.ledger().current().unwrap().coins(), 0);
}

#[test]
fn failed_commit_rolls_back_session_and_task_cache() {
    let (engine, _dir) = engine_with_coins(0);
    let task = engine
        .create_task(
            Task::new("Seminar", TaskType::Daily, 2, Utc::now() + chrono::Duration::days(1))
                .with_rewards(40, 40),
        )
        .unwrap();
    // The deferred foreign key only fails at COMMIT, after every write succeeded
    engine
        .store()
        .execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE audit_parent (id INTEGER PRIMARY KEY);
             CREATE TABLE task_audit (
                 task_id INTEGER REFERENCES audit_parent(id) DEFERRABLE INITIALLY DEFERRED
             );
             CREATE TRIGGER audit_tasks AFTER UPDATE ON tasks
             BEGIN INSERT INTO task_audit (task_id) VALUES (-1); END;",
        )
        .unwrap();

    assert!(matches!(engine.complete_task(task.id), Err(QuestError::Persistence(_))));
    let user = engine.ledger().current().unwrap();
    assert_eq!(user.coins(), 0);
    assert_eq!(user.growth_points(), 0);
    assert_eq!(user.progress.total_tasks_completed, 0);
    assert!(!engine.tasks().task(task.id).unwrap().completed);
    assert!(!engine.store().find_task(task.id).unwrap().unwrap().completed);
    assert_eq!(stored_coins(&engine), 0);
    assert_eq!(engine.store().transaction_depth(), 0);

    engine.store().execute_batch("DROP TRIGGER audit_tasks").unwrap();
    assert!(engine.complete_task(task.id).unwrap().is_some());
    assert!(stored_coins(&engine) > 0);
}

#[test]
fn concurrent_commands_and_ledger_calls_all_land() {
    let (engine, _dir) = engine_with_coins(0);
    let engine = Arc::new(engine);
    let ids: Vec<i64> = (0..8)
        .map(|i| {
            engine
                .create_task(
                    Task::new(format!("Chore {}", i), TaskType::Custom, 1, Utc::now() + chrono::Duration::days(1))
                        .with_rewards(10, 0),
                )
                .unwrap()
                .id
        })
        .collect();
    let (done, finished) = mpsc::channel();

    let completer = {
        let engine = Arc::clone(&engine);
        let done = done.clone();
        thread::spawn(move || {
            let earned: i64 = ids
                .into_iter()
                .map(|id| engine.complete_task(id).unwrap().unwrap().reward.coins)
                .sum();
            done.send(earned).unwrap();
        })
    };
    let payer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..8 {
                let changes = engine
                    .ledger()
                    .atomically(|| engine.ledger().add_coins(1))
                    .unwrap();
                engine.ledger().announce(&changes).unwrap();
            }
            done.send(8).unwrap();
        })
    };

    let mut expected = 0;
    for _ in 0..2 {
        expected += finished
            .recv_timeout(Duration::from_secs(10))
            .expect("engine calls deadlocked");
    }
    completer.join().unwrap();
    payer.join().unwrap();

    assert_eq!(engine.ledger().current().unwrap().coins(), expected);
    assert_eq!(stored_coins(&engine), expected);
    assert_eq!(engine.store().transaction_depth(), 0);
}

#[test]
fn other_threads_wait_for_the_open_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("wait.db")).unwrap());
    let written = Arc::new(AtomicBool::new(false));

    let tx = store.begin().unwrap();
    store.insert_user("first", "h").unwrap();

    let worker = {
        let store = Arc::clone(&store);
        let written = Arc::clone(&written);
        thread::spawn(move || {
            store.insert_user("second", "h").unwrap();
            written.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!written.load(Ordering::SeqCst));
    tx.commit().unwrap();
    worker.join().unwrap();

    assert!(written.load(Ordering::SeqCst));
    assert!(store.find_user("first").unwrap().is_some());
    assert!(store.find_user("second").unwrap().is_some());
}

#[test]
fn nested_rollback_discards_outer_work() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("nested.db")).unwrap();

    let outer = store.begin().unwrap();
    store.insert_user("outer", "h").unwrap();
    {
        let inner = store.begin().unwrap();
        store.insert_user("inner", "h").unwrap();
        inner.rollback().unwrap();
    }
    assert!(outer.commit().is_err());

    assert!(store.find_user("outer").unwrap().is_none());
    assert!(store.find_user("inner").unwrap().is_none());
    assert_eq!(store.transaction_depth(), 0);
}
