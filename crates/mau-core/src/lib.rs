//! mau-core: AI Mau core library (persona brain, provider cascade,
//! schedule analytics, event store, and background sync).
//!
//! The gateway add-on composes these into the HTTP surface; everything here
//! is transport-agnostic and takes its collaborators by injection.

mod analytics;
mod brain;
mod ogp;
mod persona;
mod provider;
mod shared;
mod store;
mod sync;

// Shared envelope types and configuration
pub use shared::{
    ChatPrompt, ChatReply, ChatTurn, CoreConfig, ReplyMode, Speaker, PERSONA_DISPLAY_NAME,
};

// Persona
pub use persona::load_persona;

// Providers and the fallback cascade
pub use provider::{
    Cascade, CascadeOutcome, GeminiProvider, GroqProvider, ProviderError, TextProvider, Tier,
};
pub use provider::{GEMINI_FLASH, GEMINI_FLASH_LITE, GROQ_LLAMA};

// Brain
pub use brain::{
    build_prompt, jst_now, parse_reply, quick_reply, ChatBrain, PromptInput, OFFLINE_APOLOGY,
    QUICK_NOTE, SUGGESTIONS_DELIMITER, TIMEOUT_APOLOGY,
};

// Schedule analytics
pub use analytics::{
    is_data_question, AnalyticsService, DateAnchors, FALLBACK_QUERY, NO_MATCH_TEXT, REFUSAL_TEXT,
    SCHEMA_INFO,
};

// Event store
pub use store::{EventStore, ScheduleEvent};

// Background sync
pub use sync::{
    extract_details, normalize_event, CalendarClient, EventSource, ExtractedDetails,
    RawCalendarEvent, SyncCoordinator, SyncStatus,
};

// Link cards
pub use ogp::{fetch_ogp, parse_ogp, OgpData};
