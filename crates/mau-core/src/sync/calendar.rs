//! Public-calendar event feed.
//!
//! The calendar page exposes a monthly JSON feed of public events; the
//! fetcher walks the next few months and dedups by event id. The trait keeps
//! the transport swappable (tests inject a scripted source).

use chrono::Datelike;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// How many months ahead the sync walks, current month included.
const MONTHS_AHEAD: u32 = 4;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One event as served by the feed: epoch-millis timestamps, free-text note.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCalendarEvent {
    pub id: Value,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub note: String,
    /// Event start, Unix epoch milliseconds.
    pub start_at: i64,
    /// Feed-side last update, Unix epoch milliseconds.
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub url: String,
}

impl RawCalendarEvent {
    /// Stable external id as a string key (the feed serves numbers).
    pub fn source_id(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Source of raw calendar events. The production implementation is
/// [`CalendarClient`]; tests use a scripted double.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_upcoming(
        &self,
    ) -> Result<Vec<RawCalendarEvent>, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(default)]
    public_events: Vec<RawCalendarEvent>,
}

/// HTTP fetcher for the public-events feed.
pub struct CalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl CalendarClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// First day of the month `offset` months after `start`, as YYYY-MM-01.
    fn month_param(start: chrono::NaiveDate, offset: u32) -> String {
        let total = start.year() * 12 + start.month0() as i32 + offset as i32;
        format!("{:04}-{:02}-01", total.div_euclid(12), total.rem_euclid(12) + 1)
    }
}

#[async_trait::async_trait]
impl EventSource for CalendarClient {
    /// Walks month pages from the current month, collecting events keyed by
    /// id so month-boundary duplicates collapse. A failed page is logged and
    /// skipped; only a fully empty walk is worth reporting upstream.
    async fn fetch_upcoming(
        &self,
    ) -> Result<Vec<RawCalendarEvent>, Box<dyn std::error::Error + Send + Sync>> {
        let today = chrono::Utc::now().date_naive();
        let mut collected: BTreeMap<String, RawCalendarEvent> = BTreeMap::new();

        for offset in 0..MONTHS_AHEAD {
            let month = Self::month_param(today, offset);
            let url = format!("{}/public_events?monthly={}", self.base_url, month);
            info!("Fetching calendar month {}", month);

            let page: Result<FeedPage, _> = async {
                self.http
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<FeedPage>()
                    .await
            }
            .await;

            match page {
                Ok(page) => {
                    for event in page.public_events {
                        collected.insert(event.source_id(), event);
                    }
                }
                Err(e) => warn!("Calendar month {} failed: {}", month, e),
            }
        }

        let mut events: Vec<RawCalendarEvent> = collected.into_values().collect();
        events.sort_by_key(|e| e.start_at);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_param_wraps_year() {
        let start = chrono::NaiveDate::from_ymd_opt(2025, 11, 20).unwrap();
        assert_eq!(CalendarClient::month_param(start, 0), "2025-11-01");
        assert_eq!(CalendarClient::month_param(start, 1), "2025-12-01");
        assert_eq!(CalendarClient::month_param(start, 2), "2026-01-01");
    }

    #[test]
    fn test_source_id_stringifies_numeric_ids() {
        let event: RawCalendarEvent = serde_json::from_value(serde_json::json!({
            "id": 12345,
            "title": "Live",
            "start_at": 1760000000000_i64
        }))
        .unwrap();
        assert_eq!(event.source_id(), "12345");

        let event: RawCalendarEvent = serde_json::from_value(serde_json::json!({
            "id": "abc-1",
            "start_at": 1760000000000_i64
        }))
        .unwrap();
        assert_eq!(event.source_id(), "abc-1");
    }

    #[test]
    fn test_feed_page_tolerates_missing_fields() {
        let page: FeedPage = serde_json::from_str(r#"{"public_events":[{"id":1,"start_at":0}]}"#).unwrap();
        assert_eq!(page.public_events.len(), 1);
        assert_eq!(page.public_events[0].title, "");
        assert!(!page.public_events[0].all_day);

        let empty: FeedPage = serde_json::from_str("{}").unwrap();
        assert!(empty.public_events.is_empty());
    }
}
