//! Sled-backed schedules store: the durable home of scraped calendar events.
//!
//! One tree, keyed by the event's stable external id, JSON-encoded records.
//! The sync job upserts here; readers never touch the tree directly — they go
//! through the analytics snapshot.

use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;

const DEFAULT_PATH: &str = "./data/mau_schedules";
const TREE_NAME: &str = "schedules";

/// One calendar event as stored. `source_id` is the natural key for
/// idempotent upsert; `start_at`/`end_at`/`updated_at` are ISO-8601 strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEvent {
    pub source_id: String,
    pub title: String,
    pub start_at: String,
    pub end_at: Option<String>,
    #[serde(default)]
    pub place: String,
    #[serde(default)]
    pub ticket_url: String,
    #[serde(default)]
    pub price_details: String,
    #[serde(default)]
    pub bonus: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_all_day: bool,
    pub updated_at: String,
}

impl ScheduleEvent {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Sled-backed event store.
pub struct EventStore {
    db: Db,
}

impl EventStore {
    /// Opens or creates the store at `./data/mau_schedules`.
    pub fn new() -> Result<Self, sled::Error> {
        Self::open_path(DEFAULT_PATH)
    }

    /// Opens or creates the store at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Inserts or replaces one event, keyed by `source_id`.
    pub fn upsert(&self, event: &ScheduleEvent) -> Result<(), sled::Error> {
        let tree = self.db.open_tree(TREE_NAME)?;
        let prev = tree.insert(event.source_id.as_bytes(), event.to_bytes())?;
        tracing::debug!(
            source_id = %event.source_id,
            action = if prev.is_some() { "UPDATE" } else { "INSERT" },
            "schedule event stored"
        );
        Ok(())
    }

    /// Inserts or replaces a batch of events.
    pub fn upsert_all(&self, events: &[ScheduleEvent]) -> Result<usize, sled::Error> {
        for event in events {
            self.upsert(event)?;
        }
        Ok(events.len())
    }

    /// Returns one event by its external id.
    pub fn get(&self, source_id: &str) -> Result<Option<ScheduleEvent>, sled::Error> {
        let tree = self.db.open_tree(TREE_NAME)?;
        Ok(tree
            .get(source_id.as_bytes())?
            .and_then(|bytes| ScheduleEvent::from_bytes(&bytes)))
    }

    /// Returns every stored event, sorted by start time.
    pub fn all_events(&self) -> Result<Vec<ScheduleEvent>, sled::Error> {
        let tree = self.db.open_tree(TREE_NAME)?;
        let mut events: Vec<ScheduleEvent> = tree
            .iter()
            .values()
            .filter_map(|v| v.ok())
            .filter_map(|bytes| ScheduleEvent::from_bytes(&bytes))
            .collect();
        events.sort_by(|a, b| a.start_at.cmp(&b.start_at));
        Ok(events)
    }

    /// Number of stored events.
    pub fn len(&self) -> Result<usize, sled::Error> {
        Ok(self.db.open_tree(TREE_NAME)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, sled::Error> {
        Ok(self.len()? == 0)
    }
}
