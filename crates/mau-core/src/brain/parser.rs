//! Raw model output → display text + follow-up suggestions.

use super::prompt::SUGGESTIONS_DELIMITER;

/// Maximum suggestions surfaced to the caller.
const MAX_SUGGESTIONS: usize = 3;

/// Splits on the first delimiter occurrence. Text before it is the display
/// reply; lines after are suggestions (trimmed, empties dropped, first 3).
/// Without a delimiter the whole text is the reply. Idempotent.
pub fn parse_reply(raw: &str) -> (String, Vec<String>) {
    match raw.split_once(SUGGESTIONS_DELIMITER) {
        Some((display, tail)) => {
            let suggestions = tail
                .lines()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty())
                .take(MAX_SUGGESTIONS)
                .map(|line| line.to_string())
                .collect();
            (display.trim().to_string(), suggestions)
        }
        None => (raw.trim().to_string(), Vec::new()),
    }
}
