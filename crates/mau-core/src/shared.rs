//! Shared types used across all Mau crates.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Display name the persona uses for itself in conversation logs.
pub const PERSONA_DISPLAY_NAME: &str = "AIまう";

/// Speaker of a conversation turn, as supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

/// One turn of caller-supplied conversation history, oldest first.
/// The core reads this but never stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Speaker,
    pub text: String,
}

/// Incoming chat envelope: who is asking, what they said, and recent context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPrompt {
    pub user_name: String,
    pub text: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    /// Caller-supplied region signal (e.g. "JP"); drives the reply-language directive.
    #[serde(default)]
    pub region: Option<String>,
}

/// Which path produced a reply. Surfaced for observability and the
/// user-facing degraded-mode annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// Primary model answered.
    GeminiFlash,
    /// Lite backup answered.
    GeminiFlashLite,
    /// Final fallback answered.
    GroqLlama,
    /// Canned shortcut, no provider involved.
    QuickReply,
    /// Every tier failed; fixed apology text.
    Offline,
    /// Generation exceeded the 30s budget; fixed apology text.
    TimedOut,
}

/// Outgoing chat envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
    pub mode: ReplyMode,
    /// Up to three short follow-up suggestions for the UI.
    pub suggestions: Vec<String>,
}

/// Global application configuration (gateway + brain). Load from TOML or env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Application identity shown by /v1/status.
    pub app_name: String,
    /// HTTP port for the gateway.
    pub port: u16,
    /// "production" or "development"; development appends a reply indicator.
    pub env: String,
    /// Home region; a matching region signal keeps replies in casual Japanese.
    pub home_region: String,
    /// Base directory for the Sled schedules store.
    pub storage_path: String,
    /// Path to the persona profile file.
    pub persona_path: String,
    /// Public calendar page whose monthly JSON feed the sync job walks.
    pub calendar_url: String,
    /// Comma-separated allowed CORS origins, or "*".
    pub allowed_origins: String,
    /// Token guarding the sync trigger endpoint. None disables the endpoint.
    pub sync_token: Option<String>,
    pub gemini_api_key: Option<String>,
    pub groq_api_key: Option<String>,
}

impl CoreConfig {
    /// Load config from file and environment.
    /// Precedence: env `MAU_CONFIG` path > `config/gateway.toml` > defaults,
    /// then `MAU__*` environment overrides. The three secrets also accept the
    /// bare env names (`GEMINI_API_KEY`, `GROQ_API_KEY`, `SYNC_SECRET_TOKEN`).
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("MAU_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());
        let builder = config::Config::builder()
            .set_default("app_name", "AI Mau Gateway")?
            .set_default("port", 8080_i64)?
            .set_default("env", "production")?
            .set_default("home_region", "JP")?
            .set_default("storage_path", "./data")?
            .set_default("persona_path", "./data/mau_profile.txt")?
            .set_default(
                "calendar_url",
                "https://timetreeapp.com/public_calendars/lollipop_1116",
            )?
            .set_default("allowed_origins", "*")?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("MAU").separator("__"))
            .build()?;

        let mut cfg: Self = built.try_deserialize()?;
        cfg.sync_token = cfg.sync_token.or_else(|| env_nonempty("SYNC_SECRET_TOKEN"));
        cfg.gemini_api_key = cfg.gemini_api_key.or_else(|| env_nonempty("GEMINI_API_KEY"));
        cfg.groq_api_key = cfg.groq_api_key.or_else(|| env_nonempty("GROQ_API_KEY"));
        Ok(cfg)
    }

    /// True when running in development mode (adds the reply indicator).
    pub fn is_development(&self) -> bool {
        self.env == "development"
    }

    /// Allowed CORS origins as a list; empty means "*" (allow any).
    pub fn allowed_origins_list(&self) -> Vec<String> {
        if self.allowed_origins.trim() == "*" {
            return Vec::new();
        }
        self.allowed_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
