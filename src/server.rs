//! HTTP server: the chat page plus a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Render the page and the caller's transcript |
//! | `POST` | `/chat` | Form post from the chat box, FAQ dropdown or quick search |
//! | `GET`  | `/health` | Health check (returns version and LLM model) |
//! | `GET`  | `/api/faq` | FAQ list |
//! | `POST` | `/api/chat` | `{message, session_id?}` → `{session_id, response, sources}` |
//! | `GET`  | `/api/history?session_id=` | Transcript of a session |
//!
//! # Sessions
//!
//! Browsers are identified by the `cancerpedia_session` cookie (a UUID v4
//! minted on first visit); API clients pass `session_id` explicitly. Each
//! id maps to its own chat session, so users never share a transcript.
//!
//! # Render cycle
//!
//! `GET /` only replays the transcript. `POST /chat` routes at most one
//! input into the session and answers `303 See Other` back to `/`, which
//! clears every input: a FAQ choice is sent once per selection, never once
//! per render. A failed turn re-renders the page with status 502 and an
//! error banner, leaving the transcript as it was.
//!
//! # Error Contract
//!
//! JSON errors follow
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! with codes `bad_request` (400), `not_found` (404), `upstream_error` (502)
//! and `internal` (500).

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::app::AppContext;
use crate::models::{ChatMessage, RetrievedNode};
use crate::router::{route, InputForm, InputSource, Notice, RoutedInput};
use crate::ui::{render_page, PageView};

/// Cookie carrying the browser's session id.
pub const SESSION_COOKIE: &str = "cancerpedia_session";

type AppState = Arc<AppContext>;

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    println!("Cancerpedia Chat listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// All routes with CORS and request tracing, bound to `ctx`.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_page))
        .route("/chat", post(handle_chat_form))
        .route("/health", get(handle_health))
        .route("/api/faq", get(handle_faq))
        .route("/api/chat", post(handle_api_chat))
        .route("/api/history", get(handle_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into a JSON error response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Failures while searching the local index are ours; anything else in a
/// chat turn came from the LLM endpoint.
fn classify_chat_error(err: &anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    if err.to_string().starts_with("Retrieval failed") {
        internal(message)
    } else {
        upstream_error(message)
    }
}

// ============ Session cookie ============

/// Session id from the request cookie, if present and well formed.
fn session_from_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| Uuid::parse_str(value).is_ok())
}

/// Existing session id, or a fresh one flagged as needing a `Set-Cookie`.
fn resolve_session(headers: &HeaderMap) -> (String, bool) {
    match session_from_cookie(headers) {
        Some(id) => (id, false),
        None => (Uuid::new_v4().to_string(), true),
    }
}

fn with_session_cookie(mut response: Response, session_id: &str, minted: bool) -> Response {
    if minted {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            SESSION_COOKIE, session_id
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

// ============ GET / ============

/// Sidebar echo carried across the post/redirect.
#[derive(Debug, Default, Deserialize)]
struct NoticeQuery {
    selected: Option<String>,
    searching: Option<String>,
}

impl NoticeQuery {
    fn notice(&self) -> Option<Notice> {
        match (&self.selected, &self.searching) {
            (Some(text), _) => Some(Notice::selected(text)),
            (None, Some(text)) => Some(Notice::searching(text)),
            (None, None) => None,
        }
    }
}

/// Where to send the browser after a successful turn.
fn redirect_target(input: &RoutedInput) -> String {
    let key = match input.source {
        InputSource::Chat => return "/".to_string(),
        InputSource::Faq => "selected",
        InputSource::Search => "searching",
    };
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(key, &input.text)
        .finish();
    format!("/?{}", query)
}

async fn transcript(ctx: &AppContext, session_id: &str) -> Vec<ChatMessage> {
    match ctx.sessions.get(session_id).await {
        Some(session) => session.lock().await.history().to_vec(),
        None => Vec::new(),
    }
}

/// Handler for `GET /`. Never calls the chat session.
async fn handle_page(
    State(ctx): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let (session_id, minted) = resolve_session(&headers);
    let history = transcript(&ctx, &session_id).await;
    let notice = query.notice();

    let page = render_page(&PageView {
        ui: &ctx.config.ui,
        history: &history,
        notice: notice.as_ref(),
        error: None,
    });
    with_session_cookie(Html(page).into_response(), &session_id, minted)
}

// ============ POST /chat ============

/// Handler for the page's forms.
///
/// Routes at most one input into the caller's session, then redirects to
/// `/`. On failure the page is rendered in place with status 502.
async fn handle_chat_form(
    State(ctx): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<InputForm>,
) -> Response {
    let (session_id, minted) = resolve_session(&headers);

    let Some(input) = route(&form) else {
        return with_session_cookie(
            Redirect::to("/").into_response(),
            &session_id,
            minted,
        );
    };

    let session = ctx.session(&session_id).await;
    let mut session = session.lock().await;

    match session.chat(&input.text).await {
        Ok(answer) => {
            tracing::info!(
                source = ?input.source,
                sources = answer.sources.len(),
                "answered"
            );
            with_session_cookie(
                Redirect::to(&redirect_target(&input)).into_response(),
                &session_id,
                minted,
            )
        }
        Err(err) => {
            let message = format!("{:#}", err);
            tracing::warn!(error = %message, "chat turn failed");
            let notice = input.notice();
            let page = render_page(&PageView {
                ui: &ctx.config.ui,
                history: session.history(),
                notice: notice.as_ref(),
                error: Some(&message),
            });
            with_session_cookie(
                (StatusCode::BAD_GATEWAY, Html(page)).into_response(),
                &session_id,
                minted,
            )
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    model: String,
}

async fn handle_health(State(ctx): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: ctx.llm.model_name().to_string(),
    })
}

// ============ GET /api/faq ============

#[derive(Serialize)]
struct FaqResponse {
    faq: Vec<String>,
}

async fn handle_faq(State(ctx): State<AppState>) -> Json<FaqResponse> {
    Json(FaqResponse {
        faq: ctx.config.ui.faq.clone(),
    })
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct ChatApiResponse {
    session_id: String,
    response: String,
    sources: Vec<RetrievedNode>,
}

/// Handler for `POST /api/chat`.
///
/// Starts a new session when `session_id` is omitted. Returns `400` for
/// an empty message and `502` when the LLM call fails.
async fn handle_api_chat(
    State(ctx): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatApiResponse>, AppError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let session_id = match req.session_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        Some(_) => return Err(bad_request("session_id must not be empty")),
        None => Uuid::new_v4().to_string(),
    };

    let session = ctx.session(&session_id).await;
    let answer = session
        .lock()
        .await
        .chat(message)
        .await
        .map_err(|e| classify_chat_error(&e))?;

    Ok(Json(ChatApiResponse {
        session_id,
        response: answer.response,
        sources: answer.sources,
    }))
}

// ============ GET /api/history ============

#[derive(Deserialize)]
struct HistoryQuery {
    session_id: Option<String>,
}

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    messages: Vec<ChatMessage>,
}

async fn handle_history(
    State(ctx): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session_id = query
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| bad_request("session_id is required"))?;

    let session = ctx
        .sessions
        .get(&session_id)
        .await
        .ok_or_else(|| not_found(format!("no session with id: {}", session_id)))?;
    let messages = session.lock().await.history().to_vec();

    Ok(Json(HistoryResponse {
        session_id,
        messages,
    }))
}
