//! Per-event field extraction from the free-text note.
//!
//! The extraction model refines what the feed cannot express (start/end
//! times buried in "OPEN 17:30 / START 18:00", venue, price, ticket link,
//! bonus). It is trusted only for refinement: an extracted start whose
//! calendar day differs from the scraped timestamp is discarded.

use crate::provider::TextProvider;
use crate::store::ScheduleEvent;
use crate::sync::calendar::RawCalendarEvent;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

/// Fields the extraction model may supply. All optional; empty means "keep
/// what the feed gave us".
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ExtractedDetails {
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub place: Option<String>,
    pub ticket_url: Option<String>,
    pub price: Option<String>,
    pub bonus: Option<String>,
}

const EXTRACT_SYSTEM_TEXT: &str = "Output JSON only.";

fn extract_prompt(title: &str, date_str: &str, note: &str) -> String {
    format!(
        "You are a scheduler assistant. Extract event details from the text.\n\n\
         [Input]\n\
         Date: {date}\n\
         Title: {title}\n\
         Note: {note}\n\n\
         [Rules]\n\
         1. Output JSON: {{ \"start_at\": \"YYYY-MM-DDTHH:MM:SS+09:00\" or null, \"end_at\": ... or null, \"place\": string or null, \"ticket_url\": string or null, \"price\": string or null, \"bonus\": string or null }}\n\
         2. Handle \"1040\" as \"10:40\".\n\
         3. If \"OPEN\" and \"START\" exist, use \"START\". If only \"OPEN\", use \"OPEN\".\n\
         4. If time is \"TBA\" or unknown, return null for both start_at and end_at.\n",
        date = date_str,
        title = title,
        note = note,
    )
}

/// Asks the extraction model for refined fields. Any failure (provider
/// error, unparseable output) yields empty details; the sync keeps going
/// with the feed values.
pub async fn extract_details(
    provider: &dyn TextProvider,
    title: &str,
    date_str: &str,
    note: &str,
) -> ExtractedDetails {
    if note.trim().is_empty() {
        return ExtractedDetails::default();
    }

    let prompt = extract_prompt(title, date_str, note);
    match provider.generate(&prompt, Some(EXTRACT_SYSTEM_TEXT)).await {
        Ok(raw) => match serde_json::from_str(extract_json(&raw)) {
            Ok(details) => details,
            Err(e) => {
                warn!("Extraction output unparseable ({}): {}", e, raw);
                ExtractedDetails::default()
            }
        },
        Err(e) => {
            warn!("Extraction call failed: {}", e);
            ExtractedDetails::default()
        }
    }
}

/// Narrows model output to the outermost JSON object, tolerating prose or
/// fencing around it.
fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// JST, the calendar's home timezone.
fn jst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("fixed JST offset")
}

/// Scraped start as a JST datetime.
pub fn scraped_start(raw: &RawCalendarEvent) -> DateTime<FixedOffset> {
    jst().timestamp_millis_opt(raw.start_at).single().unwrap_or_else(|| {
        jst().timestamp_millis_opt(0).single().expect("epoch is representable")
    })
}

/// Merges the feed event with extracted details into a stored record,
/// enforcing the same-calendar-day rule on the extracted times.
pub fn normalize_event(raw: &RawCalendarEvent, details: ExtractedDetails) -> ScheduleEvent {
    let base = scraped_start(raw);
    let mut start_at = base.to_rfc3339();
    let mut end_at = None;
    let mut is_all_day = raw.all_day;

    if let Some(extracted) = details.start_at.as_deref() {
        match DateTime::parse_from_rfc3339(extracted) {
            Ok(parsed) if parsed.date_naive() == base.date_naive() => {
                start_at = extracted.to_string();
                end_at = details.end_at.clone();
                is_all_day = false;
                debug!("Refined start for {}: {}", raw.source_id(), extracted);
            }
            Ok(parsed) => {
                warn!(
                    "Extracted date {} contradicts scraped day {} for {}; keeping feed time",
                    parsed.date_naive(),
                    base.date_naive(),
                    raw.source_id()
                );
            }
            Err(e) => {
                warn!("Extracted start unparseable ({}): {}", e, extracted);
            }
        }
    }

    let updated_at = raw
        .updated_at
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
        .to_rfc3339();

    ScheduleEvent {
        source_id: raw.source_id(),
        title: raw.title.clone(),
        start_at,
        end_at,
        place: details.place.unwrap_or_default(),
        ticket_url: details.ticket_url.unwrap_or_else(|| raw.url.clone()),
        price_details: details.price.unwrap_or_default(),
        bonus: details.bonus.unwrap_or_default(),
        description: raw.note.clone(),
        is_all_day,
        updated_at,
    }
}
