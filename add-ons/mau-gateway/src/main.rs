//! Axum-based API gateway for AI Mau. Config-driven via CoreConfig.

use axum::{
    extract::{Query, State},
    extract::Json,
    http::{Method, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use mau_core::{
    fetch_ogp, load_persona, AnalyticsService, CalendarClient, Cascade, ChatBrain, ChatPrompt,
    ChatTurn, CoreConfig, EventStore, GeminiProvider, GroqProvider, ReplyMode, SyncCoordinator,
    SyncStatus, Tier, GEMINI_FLASH, GEMINI_FLASH_LITE, GROQ_LLAMA,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::field::Visit;
use tracing_subscriber::layer::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Captures the "message" field from a tracing event.
struct MessageCollector<'a>(&'a mut String);

impl Visit for MessageCollector<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            *self.0 = value.to_string();
        }
    }
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

/// Sends each tracing event as a line to a broadcast channel for SSE log streaming.
#[derive(Clone)]
struct LogBroadcastLayer {
    tx: broadcast::Sender<String>,
}

impl LogBroadcastLayer {
    fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

impl<S> tracing_subscriber::Layer<S> for LogBroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageCollector(&mut message));
        let line = format!(
            "{} [{}] {}",
            event.metadata().level(),
            event.metadata().target(),
            message
        );
        let _ = self.tx.send(line);
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[mau-gateway] .env not loaded: {} (using system environment)", e);
    }

    let (log_tx, _) = broadcast::channel(1000);
    let log_layer = LogBroadcastLayer::new(log_tx.clone());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(log_layer)
        .init();

    let config = Arc::new(CoreConfig::load().expect("load CoreConfig"));
    if config.gemini_api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY not set: Gemini tiers will be skipped");
    }
    if config.groq_api_key.is_none() {
        tracing::warn!("GROQ_API_KEY not set: Groq fallback and extraction disabled");
    }

    let storage = std::path::Path::new(&config.storage_path);
    let store = Arc::new(
        EventStore::open_path(storage.join("mau_schedules")).expect("open schedules store"),
    );

    let persona = load_persona(&config.persona_path);

    // Reply ladder: flash, then flash-lite, then Groq. Fixed priority order.
    let reply_tiers = Cascade::new(vec![
        Tier::new(
            Arc::new(GeminiProvider::new(config.gemini_api_key.clone(), GEMINI_FLASH)),
            ReplyMode::GeminiFlash,
        ),
        Tier::new(
            Arc::new(GeminiProvider::new(config.gemini_api_key.clone(), GEMINI_FLASH_LITE)),
            ReplyMode::GeminiFlashLite,
        )
        .with_annotation("\n\n(※省エネモード🔋)"),
        Tier::new(
            Arc::new(GroqProvider::new(config.groq_api_key.clone(), GROQ_LLAMA)),
            ReplyMode::GroqLlama,
        )
        .with_annotation("\n\n(※規制モード🚀)"),
    ]);

    // SQL ladder: Groq first (deterministic sampling), Gemini flash backup.
    let sql_tiers = Cascade::new(vec![
        Tier::new(
            Arc::new(GroqProvider::new(config.groq_api_key.clone(), GROQ_LLAMA).with_sampling(0.0, 256)),
            ReplyMode::GroqLlama,
        ),
        Tier::new(
            Arc::new(GeminiProvider::new(config.gemini_api_key.clone(), GEMINI_FLASH)),
            ReplyMode::GeminiFlash,
        ),
    ]);

    let analytics = Arc::new(AnalyticsService::new(Arc::clone(&store), sql_tiers));

    let brain = Arc::new(ChatBrain::new(
        persona,
        reply_tiers,
        Arc::clone(&analytics),
        config.home_region.clone(),
        config.is_development(),
    ));

    let extractor = config.groq_api_key.clone().map(|key| {
        Arc::new(GroqProvider::new(Some(key), GROQ_LLAMA).with_sampling(0.0, 512))
            as Arc<dyn mau_core::TextProvider>
    });
    let sync = Arc::new(SyncCoordinator::new(
        Arc::new(CalendarClient::new(&config.calendar_url)),
        extractor,
        Arc::clone(&store),
        analytics,
    ));

    let app = build_app(AppState {
        config: Arc::clone(&config),
        brain,
        sync,
        log_tx,
    });

    let port = config.port;
    let app_name = config.app_name.clone();
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("{} listening on {}", app_name, addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await.unwrap(),
        app,
    )
    .await
    .unwrap();
}

fn build_app(state: AppState) -> Router {
    let origins = state.config.allowed_origins_list();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok()),
        )
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status))
        .route("/api/chat", post(chat))
        .route("/api/sync-schedule", get(sync_schedule))
        .route("/api/ogp", get(ogp_lookup))
        .route("/api/v1/logs", get(logs_stream))
        .with_state(state)
        .layer(cors)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<CoreConfig>,
    pub(crate) brain: Arc<ChatBrain>,
    pub(crate) sync: Arc<SyncCoordinator>,
    pub(crate) log_tx: broadcast::Sender<String>,
}

/// GET /health – liveness check for the frontend and uptime probes.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

/// GET /v1/status – app identity from config.
async fn status(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "app_name": state.config.app_name,
        "port": state.config.port,
        "env": state.config.env,
    }))
}

#[derive(serde::Deserialize)]
struct ChatRequest {
    text: String,
    #[serde(default = "default_user_name")]
    user_name: String,
    #[serde(default)]
    history: Vec<ChatTurn>,
    #[serde(default)]
    region: Option<String>,
}

fn default_user_name() -> String {
    "Guest".to_string()
}

/// POST /api/chat – one persona reply for one message.
async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    if req.text.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(serde_json::json!({ "detail": "Message text cannot be empty" })),
        )
            .into_response();
    }

    let request_id = uuid::Uuid::new_v4();
    tracing::info!(
        "Chat request {}: {} chars from {}",
        request_id,
        req.text.chars().count(),
        req.user_name
    );

    let prompt = ChatPrompt {
        user_name: req.user_name,
        text: req.text,
        history: req.history,
        region: req.region,
    };
    let reply = state.brain.respond(&prompt).await;

    tracing::info!("Chat request {} answered via {:?}", request_id, reply.mode);
    axum::Json(serde_json::json!({
        "response": reply.text,
        "mode": reply.mode,
        "suggestions": reply.suggestions,
    }))
    .into_response()
}

#[derive(serde::Deserialize)]
struct SyncParams {
    #[serde(default)]
    token: Option<String>,
}

/// GET /api/sync-schedule?token= – token-authenticated sync trigger.
/// Rejected requests have no side effect; a running sync reports "skipped".
async fn sync_schedule(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Response {
    let authorized = match (&state.config.sync_token, &params.token) {
        (Some(expected), Some(got)) => expected == got,
        _ => false,
    };
    if !authorized {
        tracing::warn!("Unauthorized sync trigger rejected");
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "detail": "Unauthorized" })),
        )
            .into_response();
    }

    match state.sync.trigger() {
        SyncStatus::Started => axum::Json(serde_json::json!({
            "status": "started",
            "message": "Schedule sync started in background"
        }))
        .into_response(),
        SyncStatus::Skipped => axum::Json(serde_json::json!({
            "status": "skipped",
            "message": "Sync already in progress"
        }))
        .into_response(),
    }
}

#[derive(serde::Deserialize)]
struct OgpParams {
    url: String,
}

/// GET /api/ogp?url= – link-card metadata for the frontend.
async fn ogp_lookup(Query(params): Query<OgpParams>) -> Response {
    match fetch_ogp(&params.url).await {
        Some(data) => axum::Json(serde_json::json!(data)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "detail": "OGP fetch failed" })),
        )
            .into_response(),
    }
}

/// GET /api/v1/logs – Server-Sent Events stream of gateway logs (tracing output).
async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static>
{
    use async_stream::stream;
    let mut rx = state.log_tx.subscribe();
    let stream = stream! {
        loop {
            tokio::select! {
                r = rx.recv() => match r {
                    Ok(line) => yield Ok(Event::default().data(line)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Ok(Event::default().data(format!("... {} log lines dropped", n)));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    yield Ok(Event::default().comment("keepalive"));
                }
            }
        }
    };
    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use mau_core::{EventSource, ProviderError, RawCalendarEvent, TextProvider, QUICK_NOTE};
    use tower::ServiceExt;

    struct ScriptedProvider(Option<&'static str>);

    #[async_trait::async_trait]
    impl TextProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn generate(
            &self,
            _prompt: &str,
            _system: Option<&str>,
        ) -> Result<String, ProviderError> {
            match self.0 {
                Some(reply) => Ok(reply.to_string()),
                None => Err(ProviderError::Quota),
            }
        }
    }

    /// Source that parks until released so a sync can be held open.
    struct GatedSource(Arc<tokio::sync::Notify>);

    #[async_trait::async_trait]
    impl EventSource for GatedSource {
        async fn fetch_upcoming(
            &self,
        ) -> Result<Vec<RawCalendarEvent>, Box<dyn std::error::Error + Send + Sync>> {
            self.0.notified().await;
            Ok(Vec::new())
        }
    }

    fn test_log_tx() -> broadcast::Sender<String> {
        let (tx, _) = broadcast::channel(16);
        tx
    }

    fn test_config(sync_token: Option<&str>) -> CoreConfig {
        CoreConfig {
            app_name: "Test Mau Gateway".to_string(),
            port: 8080,
            env: "production".to_string(),
            home_region: "JP".to_string(),
            storage_path: "./data".to_string(),
            persona_path: "./data/mau_profile.txt".to_string(),
            calendar_url: "https://cal.example".to_string(),
            allowed_origins: "*".to_string(),
            sync_token: sync_token.map(|t| t.to_string()),
            gemini_api_key: None,
            groq_api_key: None,
        }
    }

    fn test_state(
        sync_token: Option<&str>,
        chat_reply: Option<&'static str>,
        release: Arc<tokio::sync::Notify>,
    ) -> AppState {
        let dir = tempfile::tempdir().unwrap().into_path();
        let store = Arc::new(EventStore::open_path(dir.join("db")).unwrap());
        let analytics = Arc::new(AnalyticsService::new(
            Arc::clone(&store),
            Cascade::new(vec![Tier::new(
                Arc::new(ScriptedProvider(Some("SELECT * FROM schedules LIMIT 0;"))),
                ReplyMode::GroqLlama,
            )]),
        ));
        let brain = Arc::new(ChatBrain::new(
            "テスト用ペルソナ".to_string(),
            Cascade::new(vec![Tier::new(
                Arc::new(ScriptedProvider(chat_reply)),
                ReplyMode::GeminiFlash,
            )]),
            Arc::clone(&analytics),
            "JP".to_string(),
            false,
        ));
        let sync = Arc::new(SyncCoordinator::new(
            Arc::new(GatedSource(release)),
            None,
            store,
            analytics,
        ));
        AppState {
            config: Arc::new(test_config(sync_token)),
            brain,
            sync,
            log_tx: test_log_tx(),
        }
    }

    async fn json_body(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
    }

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let app = build_app(test_state(None, Some("ok"), Arc::new(tokio::sync::Notify::new())));
        let res = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_returns_app_identity() {
        let app = build_app(test_state(None, Some("ok"), Arc::new(tokio::sync::Notify::new())));
        let res = app.oneshot(get_request("/v1/status")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["app_name"], "Test Mau Gateway");
        assert_eq!(json["port"], 8080);
    }

    #[tokio::test]
    async fn test_chat_empty_text_is_422() {
        let app = build_app(test_state(None, Some("ok"), Arc::new(tokio::sync::Notify::new())));
        let res = app
            .oneshot(chat_request(serde_json::json!({ "text": "", "user_name": "BadUser" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_chat_returns_reply_mode_and_suggestions() {
        let raw = "Aki！元気だよ！\n===SUGGESTIONS===\nまたね\nライブいつ？";
        let app = build_app(test_state(None, Some(raw), Arc::new(tokio::sync::Notify::new())));
        let res = app
            .oneshot(chat_request(serde_json::json!({
                "text": "最近どう？調子を聞かせてほしいな",
                "user_name": "Aki"
            })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["response"], "Aki！元気だよ！");
        assert_eq!(json["mode"], "gemini_flash");
        assert_eq!(json["suggestions"], serde_json::json!(["またね", "ライブいつ？"]));
    }

    #[tokio::test]
    async fn test_chat_greeting_short_circuits_to_quick_reply() {
        // Provider is a dead tier; a canned answer must not need it.
        let app = build_app(test_state(None, None, Arc::new(tokio::sync::Notify::new())));
        let res = app
            .oneshot(chat_request(serde_json::json!({ "text": "おはよう", "user_name": "Aki" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["mode"], "quick_reply");
        let text = json["response"].as_str().unwrap();
        assert!(text.contains(QUICK_NOTE.trim()));
    }

    #[tokio::test]
    async fn test_sync_without_token_is_401() {
        let app = build_app(test_state(
            Some("test-secret-token"),
            Some("ok"),
            Arc::new(tokio::sync::Notify::new()),
        ));
        let res = app.oneshot(get_request("/api/sync-schedule")).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["detail"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_sync_with_wrong_token_is_401() {
        let app = build_app(test_state(
            Some("test-secret-token"),
            Some("ok"),
            Arc::new(tokio::sync::Notify::new()),
        ));
        let res = app
            .oneshot(get_request("/api/sync-schedule?token=wrong-token"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_sync_unconfigured_token_rejects_everything() {
        let app = build_app(test_state(None, Some("ok"), Arc::new(tokio::sync::Notify::new())));
        let res = app
            .oneshot(get_request("/api/sync-schedule?token=anything"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_sync_correct_token_starts_then_skips_then_restarts() {
        let release = Arc::new(tokio::sync::Notify::new());
        let state = test_state(Some("test-secret-token"), Some("ok"), Arc::clone(&release));
        let sync = Arc::clone(&state.sync);
        let app = build_app(state);

        let res = app
            .clone()
            .oneshot(get_request("/api/sync-schedule?token=test-secret-token"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "started");

        // Second trigger while the gated source holds the run open.
        let res = app
            .clone()
            .oneshot(get_request("/api/sync-schedule?token=test-secret-token"))
            .await
            .unwrap();
        let json = json_body(res).await;
        assert_eq!(json["status"], "skipped");
        assert!(json["message"].as_str().unwrap().contains("already in progress"));

        release.notify_one();
        for _ in 0..100 {
            if !sync.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!sync.is_running(), "sync should have finished");

        let res = app
            .oneshot(get_request("/api/sync-schedule?token=test-secret-token"))
            .await
            .unwrap();
        assert_eq!(json_body(res).await["status"], "started");
        release.notify_one();
    }
}
