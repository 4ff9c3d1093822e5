//! HTTP server for the chat transcript and streamed completions.
//!
//! Persists turns in SQLite behind a small JSON API and proxies one
//! [`CompletionSession`] per request to browser clients over server-sent
//! events.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/api/messages` | Full transcript, oldest first |
//! | `POST`   | `/api/messages` | Append one `{role, content}` turn |
//! | `DELETE` | `/api/messages` | Wipe the transcript |
//! | `POST`   | `/api/chat` | Stream one reply as `text/event-stream` |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! When `[server].static_dir` is set, every other path is served from that
//! directory with a fallback to its `index.html`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": "invalid role 'bot': expected 'user' or 'model'" }
//! ```
//!
//! `400` for malformed bodies and unknown roles, `500` for store failures,
//! and `503` with an extra `"code": "missing_credential"` when `/api/chat`
//! is called without a configured API key.
//!
//! # Streaming
//!
//! `/api/chat` emits `event: fragment` with `{"text": ...}` for each piece
//! of the reply, then exactly one of `event: done` or `event: error` with
//! `{"error": ...}`. The server does not persist anything on this path; the
//! client appends both turns through `/api/messages` once the reply is done.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::credential::CredentialSource;
use crate::error::{CompletionError, StorageError};
use crate::models::{AgentConfig, Role, Turn};
use crate::provider::{CompletionProvider, GeminiProvider};
use crate::session::CompletionSession;
use crate::store::{SqliteTranscriptStore, TranscriptStore};
use crate::{db, migrate};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn TranscriptStore>,
    provider: Arc<dyn CompletionProvider>,
    credentials: CredentialSource,
    /// Used by `/api/chat` when the request carries no `agent`.
    agent: AgentConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        provider: Arc<dyn CompletionProvider>,
        credentials: CredentialSource,
        agent: AgentConfig,
    ) -> Self {
        Self {
            store,
            provider,
            credentials,
            agent,
        }
    }
}

/// Starts the HTTP server with SQLite storage and the Gemini provider.
///
/// Runs migrations first, then binds `[server].bind` and serves until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let state = AppState::new(
        Arc::new(SqliteTranscriptStore::new(pool)),
        Arc::new(GeminiProvider::new(config.provider.base_url.clone())),
        config.provider.credential_source(),
        config.agent.to_agent_config(),
    );

    if state.credentials.read().is_none() {
        warn!(
            var = %config.provider.api_key_env,
            "no API key in the environment; /api/chat will answer 503 until one is set"
        );
    }

    run_server_with_state(config, state).await
}

/// Starts the server with caller-provided storage and provider.
///
/// Used by tests and embedders that bring their own [`TranscriptStore`] or
/// [`CompletionProvider`]. `[server].bind` and `[server].static_dir` are
/// still read from `config`.
pub async fn run_server_with_state(config: &Config, state: AppState) -> anyhow::Result<()> {
    let app = router(state, config.server.static_dir.as_deref());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "server listening");
    println!("Nexus listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the route table.
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route(
            "/api/messages",
            get(handle_list_messages)
                .post(handle_append_message)
                .delete(handle_clear_messages),
        )
        .route("/api/chat", post(handle_chat))
        .route("/health", get(handle_health));

    if let Some(dir) = static_dir {
        let index = ServeFile::new(dir.join("index.html"));
        app = app.fallback_service(ServeDir::new(dir).fallback(index));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
    code: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
        code: None,
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        warn!(error = %err, "store operation failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
            code: None,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Failures raised before the reply stream opens. Anything the provider
/// reports later travels inside the SSE body as an `error` event.
impl From<CompletionError> for AppError {
    fn from(err: CompletionError) -> Self {
        AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: err.to_string(),
            code: Some(err.code()),
        }
    }
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /api/messages ============

async fn handle_list_messages(State(state): State<AppState>) -> Result<Json<Vec<Turn>>, AppError> {
    let turns = state.store.list_turns().await?;
    Ok(Json(turns))
}

/// Body of `POST /api/messages`. `role` is kept as a string so an unknown
/// value produces a readable 400 instead of a generic deserialize error.
#[derive(Deserialize)]
struct AppendRequest {
    role: String,
    content: String,
}

async fn handle_append_message(
    State(state): State<AppState>,
    body: Result<Json<AppendRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SuccessResponse>), AppError> {
    let Json(request) = body?;
    let role: Role = request
        .role
        .parse()
        .map_err(|err: crate::models::InvalidRole| bad_request(err.to_string()))?;

    state.store.append_turn(role, &request.content).await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse { success: true })))
}

async fn handle_clear_messages(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.store.clear_all().await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatBody {
    #[serde(default)]
    history: Vec<Turn>,
    message: String,
    #[serde(default)]
    agent: Option<AgentConfig>,
}

#[derive(Serialize)]
struct FragmentData<'a> {
    text: &'a str,
}

/// Handler for `POST /api/chat`.
///
/// The credential is checked before the response starts, so a missing key
/// is a plain `503` rather than an event stream.
async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(request) = body?;
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let agent = match request.agent {
        Some(agent) => {
            let temperature = agent.temperature;
            agent.with_temperature(temperature)
        }
        None => state.agent.clone(),
    };
    let history: Vec<Turn> = request
        .history
        .into_iter()
        .filter(|turn| !turn.ephemeral)
        .collect();

    let session = CompletionSession::open(
        state.provider.clone(),
        &state.credentials,
        &history,
        &request.message,
        &agent,
    )?;

    Ok(Sse::new(session_events(session)).keep_alive(KeepAlive::default()))
}

/// One `fragment` event per piece of text, then a single `done` or `error`.
fn session_events(session: CompletionSession) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some(session), |session| async move {
        let Some(mut session) = session else {
            return None;
        };
        let event = match session.next_fragment().await {
            Some(Ok(text)) => {
                let data = serde_json::to_string(&FragmentData { text: &text })
                    .unwrap_or_else(|_| "{}".to_string());
                return Some((Event::default().event("fragment").data(data), Some(session)));
            }
            Some(Err(err)) => {
                let data = serde_json::json!({ "error": err.to_string(), "code": err.code() });
                Event::default().event("error").data(data.to_string())
            }
            None => Event::default().event("done").data("{}"),
        };
        Some((event, None))
    })
    .map(Ok)
}
