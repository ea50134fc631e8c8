//! Background dataset refresh with an at-most-one-run guarantee.

pub mod calendar;
pub mod extract;

pub use calendar::{CalendarClient, EventSource, RawCalendarEvent};
pub use extract::{extract_details, normalize_event, ExtractedDetails};

use crate::analytics::AnalyticsService;
use crate::provider::TextProvider;
use crate::store::EventStore;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Pause between extraction calls (the provider rate-limits bursts).
const EXTRACT_PACING: Duration = Duration::from_millis(300);

/// Outcome of a trigger request. `Skipped` is a normal result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Started,
    Skipped,
}

/// Clears the in-progress flag when the run ends, however it ends.
struct RunGuard {
    flag: Arc<Mutex<bool>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut in_progress = self.flag.lock().unwrap_or_else(|e| e.into_inner());
        *in_progress = false;
    }
}

/// Serializes background refreshes: at most one run process-wide, triggers
/// during a run report `Skipped` instead of queuing.
pub struct SyncCoordinator {
    in_progress: Arc<Mutex<bool>>,
    source: Arc<dyn EventSource>,
    /// Extraction model; None disables note refinement (feed values only).
    extractor: Option<Arc<dyn TextProvider>>,
    store: Arc<EventStore>,
    analytics: Arc<AnalyticsService>,
}

impl SyncCoordinator {
    pub fn new(
        source: Arc<dyn EventSource>,
        extractor: Option<Arc<dyn TextProvider>>,
        store: Arc<EventStore>,
        analytics: Arc<AnalyticsService>,
    ) -> Self {
        Self {
            in_progress: Arc::new(Mutex::new(false)),
            source,
            extractor,
            store,
            analytics,
        }
    }

    /// Accepts or skips a refresh request. On acceptance the job runs on a
    /// background task and this returns immediately.
    pub fn trigger(&self) -> SyncStatus {
        // Set-under-lock: two near-simultaneous triggers cannot both pass.
        {
            let mut in_progress = self.in_progress.lock().unwrap_or_else(|e| e.into_inner());
            if *in_progress {
                info!("Sync already in progress, skipping");
                return SyncStatus::Skipped;
            }
            *in_progress = true;
        }

        let guard = RunGuard { flag: Arc::clone(&self.in_progress) };
        let source = Arc::clone(&self.source);
        let extractor = self.extractor.clone();
        let store = Arc::clone(&self.store);
        let analytics = Arc::clone(&self.analytics);

        tokio::spawn(async move {
            // Owns the guard for the whole run; dropping it (normal return,
            // early error, or panic unwinding) clears the flag under lock.
            let _guard = guard;
            match run_refresh(source, extractor, store, analytics).await {
                Ok(count) => info!("Sync complete: {} events stored", count),
                Err(e) => error!("Sync failed: {}", e),
            }
        });

        SyncStatus::Started
    }

    /// Whether a refresh is currently running.
    pub fn is_running(&self) -> bool {
        *self.in_progress.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fetch → per-event extraction (with the same-day rule) → upsert →
/// snapshot invalidation.
async fn run_refresh(
    source: Arc<dyn EventSource>,
    extractor: Option<Arc<dyn TextProvider>>,
    store: Arc<EventStore>,
    analytics: Arc<AnalyticsService>,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    info!("Sync starting");
    let raw_events = source.fetch_upcoming().await?;
    if raw_events.is_empty() {
        warn!("Calendar feed returned no events");
        return Ok(0);
    }
    info!("Processing {} raw events", raw_events.len());

    let mut events = Vec::with_capacity(raw_events.len());
    for raw in &raw_events {
        let details = match &extractor {
            Some(provider) if !raw.note.trim().is_empty() => {
                let date_str = extract::scraped_start(raw).format("%Y-%m-%d").to_string();
                let details =
                    extract_details(provider.as_ref(), &raw.title, &date_str, &raw.note).await;
                // The extraction provider rate-limits bursts; keep calls paced.
                tokio::time::sleep(EXTRACT_PACING).await;
                details
            }
            _ => ExtractedDetails::default(),
        };
        events.push(normalize_event(raw, details));
    }

    let count = store.upsert_all(&events)?;
    analytics.invalidate_snapshot();
    Ok(count)
}
