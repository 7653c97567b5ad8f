//! Growth history: snapshots of each user's progression over time.
//!
//! Snapshots are captured on demand for the session user and once a day for
//! every account by the scheduler. Timelines come back oldest first and are
//! thinned when they grow too long to display.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use quest_common::growth::{export_csv, thin_timeline};
use quest_common::{GrowthSnapshot, Result};

use crate::journal::Journal;
use crate::ledger::Ledger;
use crate::store::Store;

pub struct GrowthHistory {
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    journal: Option<Arc<Journal>>,
}

impl GrowthHistory {
    pub fn new(store: Arc<Store>, ledger: Arc<Ledger>, journal: Option<Arc<Journal>>) -> Self {
        Self { store, ledger, journal }
    }

    fn journal_entries(&self) -> u32 {
        let Some(journal) = &self.journal else {
            return 0;
        };
        match journal.read_all() {
            Ok(entries) => u32::try_from(entries.len()).unwrap_or(u32::MAX),
            Err(e) => {
                warn!("could not count journal entries: {}", e);
                0
            }
        }
    }

    pub fn capture(&self) -> Result<GrowthSnapshot> {
        self.capture_at(Utc::now())
    }

    /// Record the session user as it is now
    pub fn capture_at(&self, now: DateTime<Utc>) -> Result<GrowthSnapshot> {
        let user = self.ledger.current()?;
        let mut snapshot = GrowthSnapshot::of(&user, now, self.journal_entries());
        snapshot.id = self.store.insert_snapshot(&snapshot)?;
        debug!("captured growth snapshot {} for '{}'", snapshot.id, snapshot.owner);
        Ok(snapshot)
    }

    /// One snapshot per account, written in a single transaction
    pub fn capture_all_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let journal_entries = self.journal_entries();
        let tx = self.store.begin()?;
        let mut captured = 0;
        for username in self.store.load_usernames()? {
            if let Some(user) = self.store.find_user(&username)? {
                self.store.insert_snapshot(&GrowthSnapshot::of(&user, now, journal_entries))?;
                captured += 1;
            }
        }
        tx.commit()?;
        info!("Captured {} growth snapshots", captured);
        Ok(captured)
    }

    /// The session user's timeline between `start` and `end`, both inclusive
    pub fn timeline(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Vec<GrowthSnapshot>> {
        let username = self.ledger.username()?;
        self.timeline_for(&username, start, end)
    }

    pub fn timeline_for(
        &self,
        owner: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<GrowthSnapshot>> {
        Ok(thin_timeline(self.store.load_snapshots(owner, start, end)?))
    }

    /// Full, unthinned timeline as CSV with a header row
    pub fn export_csv(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<String> {
        let username = self.ledger.username()?;
        Ok(export_csv(&self.store.load_snapshots(&username, start, end)?))
    }
}
