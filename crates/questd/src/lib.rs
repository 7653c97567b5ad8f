//! Questline daemon library - the progression engine.
//!
//! Store, ledger, task lifecycle, achievements, inventory and effects, shop,
//! daily check-ins, growth history, scheduler and journal, assembled by
//! [`engine::Engine`].

pub mod achievements;
pub mod catalog;
pub mod engine;
pub mod history;
pub mod inventory;
pub mod journal;
pub mod ledger;
pub mod scheduler;
pub mod serendipity;
pub mod shop;
pub mod store;
pub mod tasks;

pub use engine::{Engine, Snapshot};
