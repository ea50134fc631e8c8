//! The persona brain: canned shortcut → schedule analytics → provider
//! cascade → reply parsing, all under one fixed response budget.

mod parser;
mod prompt;
mod quick;

pub use parser::parse_reply;
pub use prompt::{build_prompt, PromptInput, SUGGESTIONS_DELIMITER};
pub use quick::{quick_reply, QUICK_NOTE};

use crate::analytics::{is_data_question, AnalyticsService};
use crate::provider::{Cascade, CascadeOutcome};
use crate::shared::{ChatPrompt, ChatReply, ReplyMode};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Shown when every provider tier fails.
pub const OFFLINE_APOLOGY: &str =
    "ごめんね、今日は回線が全部パンクしちゃったみたい😵‍💫💦 また明日遊ぼうね！";

/// Shown when generation exceeds the response budget.
pub const TIMEOUT_APOLOGY: &str = "考え中...（エラー: 30秒応答なし）😵‍💫";

/// Appended to replies in development mode.
const DEV_NOTE: &str = "\n🛠️ (Dev Check)";

/// Full response-generation budget; expiry cancels the in-flight work.
const RESPONSE_BUDGET: Duration = Duration::from_secs(30);

/// Current time in JST, the persona's home timezone.
pub fn jst_now() -> DateTime<FixedOffset> {
    let jst = FixedOffset::east_opt(9 * 3600).expect("fixed JST offset");
    Utc::now().with_timezone(&jst)
}

/// The orchestration object: persona text, reply cascade, analytics, and the
/// home-region signal, all injected at construction. No global state; safe
/// to share across concurrent requests.
pub struct ChatBrain {
    persona: String,
    reply_tiers: Cascade,
    analytics: Arc<AnalyticsService>,
    home_region: String,
    dev_mode: bool,
    budget: Duration,
}

impl ChatBrain {
    pub fn new(
        persona: String,
        reply_tiers: Cascade,
        analytics: Arc<AnalyticsService>,
        home_region: String,
        dev_mode: bool,
    ) -> Self {
        Self {
            persona,
            reply_tiers,
            analytics,
            home_region,
            dev_mode,
            budget: RESPONSE_BUDGET,
        }
    }

    /// Overrides the response budget (tests only need milliseconds).
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Produces one reply for the envelope. Every failure path resolves to a
    /// well-defined reply; this never returns an error.
    pub async fn respond(&self, prompt: &ChatPrompt) -> ChatReply {
        if let Some(text) = quick_reply(&prompt.text) {
            info!("Canned shortcut reply for {}", prompt.user_name);
            return ChatReply {
                text: self.with_dev_note(text),
                mode: ReplyMode::QuickReply,
                suggestions: Vec::new(),
            };
        }

        match tokio::time::timeout(self.budget, self.generate(prompt)).await {
            Ok(reply) => reply,
            Err(_) => {
                error!("Reply generation exceeded {:?}", self.budget);
                ChatReply {
                    text: TIMEOUT_APOLOGY.to_string(),
                    mode: ReplyMode::TimedOut,
                    suggestions: Vec::new(),
                }
            }
        }
    }

    async fn generate(&self, prompt: &ChatPrompt) -> ChatReply {
        let now = jst_now();

        let context = if is_data_question(&prompt.text) {
            info!("Data question detected, generating SQL");
            let sql = self.analytics.generate_sql(&prompt.text, now).await;
            let rendered = self.analytics.run_query(&sql);
            info!("Analysis result: {}", rendered.chars().take(50).collect::<String>());
            Some(rendered)
        } else {
            None
        };

        let instruction = build_prompt(&PromptInput {
            user_name: &prompt.user_name,
            text: &prompt.text,
            history: &prompt.history,
            context: context.as_deref(),
            region: prompt.region.as_deref(),
            home_region: &self.home_region,
            now,
        });

        match self.reply_tiers.generate(&instruction, Some(&self.persona)).await {
            CascadeOutcome::Answered { text, mode, annotation } => {
                let (mut display, suggestions) = parse_reply(&text);
                if let Some(note) = annotation {
                    display.push_str(note);
                }
                ChatReply { text: self.with_dev_note(display), mode, suggestions }
            }
            CascadeOutcome::Exhausted => ChatReply {
                text: self.with_dev_note(OFFLINE_APOLOGY.to_string()),
                mode: ReplyMode::Offline,
                suggestions: Vec::new(),
            },
        }
    }

    fn with_dev_note(&self, text: String) -> String {
        if self.dev_mode {
            format!("{}{}", text, DEV_NOTE)
        } else {
            text
        }
    }
}
