//! Schedule analytics: natural-language questions become one read-only SQL
//! statement, executed against an in-memory copy of the schedules snapshot.
//!
//! The SELECT gate here is a hard security boundary: the SQL text comes from
//! a remote model, so anything that does not lexically begin with SELECT is
//! refused without execution. Execution errors are rendered as short
//! diagnostic strings because the output feeds the persona prompt, not a
//! programmatic caller.

use crate::provider::{Cascade, CascadeOutcome};
use crate::store::{EventStore, ScheduleEvent};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Snapshot freshness window.
const SNAPSHOT_TTL: Duration = Duration::from_secs(300);

/// Safe no-op returned when SQL generation fails entirely.
pub const FALLBACK_QUERY: &str = "SELECT * FROM schedules LIMIT 0;";

/// Fixed refusal for anything that is not a SELECT.
pub const REFUSAL_TEXT: &str = "エラー: 安全のため、SELECTクエリ以外は実行できません。";

/// Fixed sentinel for an empty result set.
pub const NO_MATCH_TEXT: &str = "（条件に一致する予定はありませんでした）";

/// Messages containing one of these are treated as data questions.
const DATA_KEYWORDS: [&str; 9] = [
    "いつ", "予定", "スケジュール", "ライブ", "イベント", "何回", "件数", "分析", "教えて",
];

/// Table definition presented to the SQL generator. Must stay in sync with
/// [`ScheduleEvent`] and the columns created in `execute_select`.
pub const SCHEMA_INFO: &str = "\
Table: schedules
Columns:
  - title (text): イベント名
  - start_at (text): 開始日時 (ISO 8601 format: YYYY-MM-DDTHH:MM:SS)
  - place (text): 会場
  - price_details (text): 料金
  - ticket_url (text): チケットURL
  - bonus (text): 特典
  - description (text): 詳細メモ
";

/// True when the message looks like a question about schedule data.
pub fn is_data_question(text: &str) -> bool {
    DATA_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Relative-date anchors substituted literally into the generation prompt so
/// the model never reaches for database-side now() functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateAnchors {
    pub now: String,
    pub today: NaiveDate,
    pub tomorrow: NaiveDate,
    pub this_saturday: NaiveDate,
    pub this_sunday: NaiveDate,
    pub next_saturday: NaiveDate,
    pub next_sunday: NaiveDate,
}

impl DateAnchors {
    pub fn from_now(now: DateTime<FixedOffset>) -> Self {
        let today = now.date_naive();
        // Mon=0 .. Sun=6; Saturday already past mid-weekend counts as "this".
        let weekday = today.weekday().num_days_from_monday() as i64;
        let this_saturday = if weekday >= 5 {
            today - ChronoDuration::days(weekday - 5)
        } else {
            today + ChronoDuration::days(5 - weekday)
        };
        let this_sunday = this_saturday + ChronoDuration::days(1);
        Self {
            now: now.to_rfc3339(),
            today,
            tomorrow: today + ChronoDuration::days(1),
            this_saturday,
            this_sunday,
            next_saturday: this_saturday + ChronoDuration::days(7),
            next_sunday: this_sunday + ChronoDuration::days(7),
        }
    }
}

/// Builds the SQL-generation instruction for one question.
fn sql_prompt(question: &str, anchors: &DateAnchors) -> String {
    format!(
        "You are a Data Analyst.\n\
         Generate a single SQL query (SQLite syntax) to answer the user's question.\n\n\
         [Schema]\n{schema}\n\
         [User Question]\n{question}\n\n\
         [Date Anchors]\n\
         Current timestamp: {now}\n\
         today = '{today}'\n\
         tomorrow = '{tomorrow}'\n\
         this weekend = '{this_sat}' and '{this_sun}'\n\
         next weekend = '{next_sat}' and '{next_sun}'\n\n\
         [Constraints]\n\
         1. Output ONLY the raw SQL query. Do not use Markdown (```sql ... ```).\n\
         2. Use `SELECT` only. No INSERT/UPDATE/DELETE.\n\
         3. Exactly one statement. Do not declare variables or temporary objects.\n\
         4. Never call date('now') or datetime('now'). Substitute the literal date\n\
            anchors above instead. Example: `WHERE start_at >= '{today}'`\n\
         5. If the question implies \"how many\", use `COUNT(*)`.\n\
         6. If the question implies \"list\" or \"schedule\", prefer `SELECT *` or\n\
            explicitly select `title`, `start_at`, `place`, `price_details`,\n\
            `ticket_url`, and `bonus`.\n",
        schema = SCHEMA_INFO,
        question = question,
        now = anchors.now,
        today = anchors.today,
        tomorrow = anchors.tomorrow,
        this_sat = anchors.this_saturday,
        this_sun = anchors.this_sunday,
        next_sat = anchors.next_saturday,
        next_sun = anchors.next_sunday,
    )
}

const SQL_SYSTEM_TEXT: &str =
    "You are a SQL expert. Output ONLY the raw SQL query string. No Markdown.";

/// Removes markdown code fences a model may wrap the query in.
fn strip_fences(sql: &str) -> String {
    sql.replace("```sql", "").replace("```", "").trim().to_string()
}

struct CachedSnapshot {
    events: Arc<Vec<ScheduleEvent>>,
    loaded_at: Instant,
}

/// Schedule analytics service: SQL generation cascade + read-only sandbox
/// over a time-boxed snapshot of the event store.
pub struct AnalyticsService {
    store: Arc<EventStore>,
    sql_tiers: Cascade,
    cache: Mutex<Option<CachedSnapshot>>,
}

impl AnalyticsService {
    pub fn new(store: Arc<EventStore>, sql_tiers: Cascade) -> Self {
        Self { store, sql_tiers, cache: Mutex::new(None) }
    }

    /// Turns a natural-language question into one SELECT statement.
    /// Total generation failure yields the zero-row fallback query.
    pub async fn generate_sql(&self, question: &str, now: DateTime<FixedOffset>) -> String {
        let anchors = DateAnchors::from_now(now);
        let prompt = sql_prompt(question, &anchors);
        match self.sql_tiers.generate(&prompt, Some(SQL_SYSTEM_TEXT)).await {
            CascadeOutcome::Answered { text, .. } => strip_fences(&text),
            CascadeOutcome::Exhausted => {
                error!("SQL generation failed on every tier, using zero-row fallback");
                FALLBACK_QUERY.to_string()
            }
        }
    }

    /// Executes a generated query against the current snapshot and renders
    /// the result as compact text for the persona prompt.
    pub fn run_query(&self, raw_sql: &str) -> String {
        let sql = strip_fences(raw_sql);
        if !sql.to_uppercase().starts_with("SELECT") {
            warn!("Blocked non-SELECT query: {}", sql);
            return REFUSAL_TEXT.to_string();
        }

        info!("Executing SQL: {}", sql);
        let events = self.snapshot();
        match execute_select(&sql, &events) {
            Ok(table) => table,
            Err(e) => {
                error!("SQL execution error: {} | query: {}", e, sql);
                format!("データ検索中にエラーが発生しました: {}", e)
            }
        }
    }

    /// Current snapshot, reloaded from the store when older than the TTL.
    /// A load failure falls back to the previous snapshot when one exists.
    pub fn snapshot(&self) -> Arc<Vec<ScheduleEvent>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < SNAPSHOT_TTL {
                return Arc::clone(&cached.events);
            }
        }
        match self.store.all_events() {
            Ok(events) => {
                info!("Snapshot refreshed: {} events", events.len());
                let events = Arc::new(events);
                *cache = Some(CachedSnapshot {
                    events: Arc::clone(&events),
                    loaded_at: Instant::now(),
                });
                events
            }
            Err(e) => {
                error!("Snapshot load failed: {}", e);
                cache
                    .as_ref()
                    .map(|c| Arc::clone(&c.events))
                    .unwrap_or_else(|| Arc::new(Vec::new()))
            }
        }
    }

    /// Drops the cached snapshot so the next read sees fresh data
    /// (called by the sync job after an upsert pass).
    pub fn invalidate_snapshot(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = None;
    }
}

/// Builds a throwaway in-memory database from the snapshot, runs the query,
/// and renders the rows as a markdown table.
fn execute_select(sql: &str, events: &[ScheduleEvent]) -> Result<String, rusqlite::Error> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "CREATE TABLE schedules (
            source_id TEXT,
            title TEXT,
            start_at TEXT,
            end_at TEXT,
            place TEXT,
            ticket_url TEXT,
            price_details TEXT,
            bonus TEXT,
            description TEXT,
            is_all_day INTEGER,
            updated_at TEXT
        );",
    )?;

    {
        let mut insert = conn.prepare(
            "INSERT INTO schedules (source_id, title, start_at, end_at, place, ticket_url,
                                    price_details, bonus, description, is_all_day, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for event in events {
            insert.execute(rusqlite::params![
                event.source_id,
                event.title,
                event.start_at,
                event.end_at,
                event.place,
                event.ticket_url,
                event.price_details,
                event.bonus,
                event.description,
                event.is_all_day as i64,
                event.updated_at,
            ])?;
        }
    }

    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query([])?;
    let mut rendered_rows: Vec<Vec<String>> = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value: SqlValue = row.get(i)?;
            cells.push(render_cell(value));
        }
        rendered_rows.push(cells);
    }

    if rendered_rows.is_empty() {
        return Ok(NO_MATCH_TEXT.to_string());
    }
    Ok(render_table(&columns, &rendered_rows))
}

fn render_cell(value: SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(t) => t,
        SqlValue::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

/// Markdown table: header row, separator, one line per row.
fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    out.push_str("| ");
    out.push_str(&columns.join(" | "));
    out.push_str(" |\n|");
    for _ in columns {
        out.push_str("---|");
    }
    out.push('\n');
    for row in rows {
        out.push_str("| ");
        out.push_str(&row.join(" | "));
        out.push_str(" |\n");
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, TextProvider, Tier};
    use crate::shared::ReplyMode;
    use chrono::TimeZone;

    struct ScriptedSql(Option<&'static str>);

    #[async_trait::async_trait]
    impl TextProvider for ScriptedSql {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn generate(
            &self,
            _prompt: &str,
            _system: Option<&str>,
        ) -> Result<String, ProviderError> {
            match self.0 {
                Some(sql) => Ok(sql.to_string()),
                None => Err(ProviderError::Quota),
            }
        }
    }

    fn service_with(events: Vec<ScheduleEvent>, sql: Option<&'static str>) -> AnalyticsService {
        let dir = tempfile::tempdir().unwrap().into_path();
        let store = Arc::new(EventStore::open_path(dir.join("db")).unwrap());
        store.upsert_all(&events).unwrap();
        let tiers = vec![Tier::new(Arc::new(ScriptedSql(sql)), ReplyMode::GroqLlama)];
        AnalyticsService::new(store, Cascade::new(tiers))
    }

    fn event(source_id: &str, title: &str, start_at: &str, bonus: &str) -> ScheduleEvent {
        ScheduleEvent {
            source_id: source_id.to_string(),
            title: title.to_string(),
            start_at: start_at.to_string(),
            end_at: None,
            place: "Zepp Tokyo".to_string(),
            ticket_url: "https://t.example/1".to_string(),
            price_details: "3500円".to_string(),
            bonus: bonus.to_string(),
            description: String::new(),
            is_all_day: false,
            updated_at: "2025-01-01T00:00:00+00:00".to_string(),
        }
    }

    fn jst_now() -> DateTime<FixedOffset> {
        // Wednesday 2025-10-08
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 10, 8, 12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_non_select_is_refused_without_execution() {
        let service = service_with(vec![], None);
        assert_eq!(service.run_query("DELETE FROM schedules"), REFUSAL_TEXT);
        assert_eq!(service.run_query("DROP TABLE schedules;"), REFUSAL_TEXT);
        assert_eq!(
            service.run_query("UPDATE schedules SET title = 'x'"),
            REFUSAL_TEXT
        );
    }

    #[test]
    fn test_fenced_select_is_cleaned_and_executed() {
        let service = service_with(
            vec![event("a", "Live A", "2025-10-10T19:00:00+09:00", "")],
            None,
        );
        let result = service.run_query("```sql\nSELECT title, place FROM schedules\n```");
        assert!(result.contains("Live A"));
        assert!(result.contains("Zepp Tokyo"));
        assert!(result.contains("| title |"));
    }

    #[test]
    fn test_empty_result_renders_sentinel() {
        let service = service_with(vec![], None);
        assert_eq!(service.run_query("SELECT * FROM schedules"), NO_MATCH_TEXT);
    }

    #[test]
    fn test_malformed_query_renders_diagnostic() {
        let service = service_with(vec![], None);
        let result = service.run_query("SELECT nonexistent_column FROM schedules");
        assert!(result.starts_with("データ検索中にエラーが発生しました"));
    }

    #[test]
    fn test_bonus_column_survives_rendering() {
        let service = service_with(
            vec![event("a", "Anniversary Live", "2025-10-12T18:00:00+09:00", "限定チェキ")],
            None,
        );
        let result = service.run_query("SELECT title, bonus FROM schedules");
        assert!(result.contains("限定チェキ"));
    }

    #[tokio::test]
    async fn test_generate_sql_strips_fences() {
        let service = service_with(vec![], Some("```sql\nSELECT * FROM schedules\n```"));
        let sql = service.generate_sql("ライブいつ？", jst_now()).await;
        assert_eq!(sql, "SELECT * FROM schedules");
    }

    #[tokio::test]
    async fn test_generate_sql_falls_back_to_zero_row_query() {
        let service = service_with(vec![], None);
        let sql = service.generate_sql("ライブいつ？", jst_now()).await;
        assert_eq!(sql, FALLBACK_QUERY);
    }

    #[test]
    fn test_date_anchors_midweek() {
        let anchors = DateAnchors::from_now(jst_now());
        assert_eq!(anchors.today.to_string(), "2025-10-08");
        assert_eq!(anchors.tomorrow.to_string(), "2025-10-09");
        assert_eq!(anchors.this_saturday.to_string(), "2025-10-11");
        assert_eq!(anchors.this_sunday.to_string(), "2025-10-12");
        assert_eq!(anchors.next_saturday.to_string(), "2025-10-18");
    }

    #[test]
    fn test_date_anchors_on_sunday_keep_current_weekend() {
        let sunday = FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 10, 12, 9, 0, 0)
            .unwrap();
        let anchors = DateAnchors::from_now(sunday);
        assert_eq!(anchors.this_saturday.to_string(), "2025-10-11");
        assert_eq!(anchors.this_sunday.to_string(), "2025-10-12");
    }

    #[test]
    fn test_prompt_contains_literal_anchors() {
        let anchors = DateAnchors::from_now(jst_now());
        let prompt = sql_prompt("今週末の予定は？", &anchors);
        assert!(prompt.contains("today = '2025-10-08'"));
        assert!(prompt.contains("this weekend = '2025-10-11' and '2025-10-12'"));
        assert!(prompt.contains("Never call date('now')"));
        assert!(prompt.contains("Table: schedules"));
    }

    #[test]
    fn test_data_question_detection() {
        assert!(is_data_question("いつライブある？"));
        assert!(is_data_question("来月の予定教えて"));
        assert!(!is_data_question("おはよう"));
    }

    #[test]
    fn test_snapshot_invalidation_picks_up_new_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EventStore::open_path(dir.path().join("db")).unwrap());
        let service = AnalyticsService::new(
            Arc::clone(&store),
            Cascade::new(vec![Tier::new(Arc::new(ScriptedSql(None)), ReplyMode::GroqLlama)]),
        );

        assert!(service.snapshot().is_empty());
        store
            .upsert(&event("late", "Added Live", "2025-11-01T18:00:00+09:00", ""))
            .unwrap();
        // Cached snapshot still empty until invalidated.
        assert!(service.snapshot().is_empty());
        service.invalidate_snapshot();
        assert_eq!(service.snapshot().len(), 1);
    }
}
