//! QuizBank API
//!
//! REST surface for the QuizBank backend. The transport owns JSON binding,
//! the `{success, message, data}` envelope, the error-code to status-code
//! mapping, and the side-channel headers; everything semantic lives in the
//! engine.
//!
//! ## Routes
//!
//! - `POST /api/v1/users/{user_id}/default-bank` - bootstrap the default bank
//! - `PUT  /api/v1/users/{user_id}/banks/{bank_id}/questions` - upsert a question
//! - `GET  /api/v1/users/{user_id}/banks/{bank_id}/questions` - query questions
//! - `GET  /health`, `GET /metrics`
//!
//! ## Identity
//!
//! Authentication is an upstream collaborator; the caller's established
//! identity arrives as the `X-Authenticated-User` header and is bound
//! against path parameters by the engine's validation chain.

pub mod metrics;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use quizbank_core::command::{BootstrapCommand, CommandContext, UpsertQuestionCommand};
use quizbank_core::{QuizBankError, Result};
use quizbank_engine::{QuestionQueryParams, QuizBankService};

/// Request ID for tracking requests through the system.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: QuizBankService,
}

/// The uniform response envelope.
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Build the full router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route(
            "/api/v1/users/{user_id}/default-bank",
            post(bootstrap_default_bank),
        )
        .route(
            "/api/v1/users/{user_id}/banks/{bank_id}/questions",
            put(upsert_question).get(query_questions),
        )
        .layer(middleware::from_fn(metrics::track_metrics))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "ok"
}

/// Middleware to add a request ID to every request.
async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4().to_string());
    req.extensions_mut().insert(request_id.clone());
    next.run(req).await
}

/// Map an error code to the HTTP status the contract prescribes.
fn status_for(code: &str) -> StatusCode {
    match code {
        "UNAUTHORIZED_ACCESS" | "QUESTION_BANK_NOT_FOUND" | "TAXONOMY_REFERENCE_NOT_FOUND" => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        "DUPLICATE_USER" | "DUPLICATE_SOURCE_QUESTION_ID" => StatusCode::CONFLICT,
        "INVALID_QUERY_PARAMETER" | "MISSING_REQUIRED_FIELD" | "INVALID_QUESTION_TYPE"
        | "TYPE_DATA_MISMATCH" | "CONSTRAINT_VIOLATION" => StatusCode::BAD_REQUEST,
        code if code.starts_with("MCQ_")
            || code.starts_with("TRUE_FALSE_")
            || code.starts_with("ESSAY_") =>
        {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &QuizBankError) -> Response {
    let status = status_for(err.code());
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(code = err.code(), error = %err, "request failed");
    }
    (status, Json(ApiResponse::fail(err.to_string()))).into_response()
}

/// The authenticated caller's identity, established by the upstream auth
/// collaborator.
fn authenticated_user(headers: &HeaderMap) -> Result<i64> {
    headers
        .get("x-authenticated-user")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| {
            QuizBankError::UnauthorizedAccess(
                "request carries no authenticated identity".to_string(),
            )
        })
}

fn command_context(headers: &HeaderMap, request_id: &RequestId) -> Result<CommandContext> {
    let mut ctx = CommandContext::new(authenticated_user(headers)?, request_id.0.clone());
    if let Some(session) = header_str(headers, "x-session-id") {
        ctx = ctx.with_session(session);
    }
    if let Some(ip) = header_str(headers, "x-forwarded-for") {
        ctx = ctx.with_client_ip(ip);
    }
    if let Some(agent) = header_str(headers, "user-agent") {
        ctx = ctx.with_user_agent(agent);
    }
    Ok(ctx)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Optional per-request deadline in milliseconds.
fn request_timeout(headers: &HeaderMap) -> Option<std::time::Duration> {
    headers
        .get("x-request-timeout-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(std::time::Duration::from_millis)
}

/// Run a blocking engine call on the blocking pool, honoring the deadline.
///
/// A timed-out command needs no compensation: any partial progress sits in a
/// transaction that never commits.
async fn run_engine<T, F>(headers: &HeaderMap, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(op);
    let joined = match request_timeout(headers) {
        Some(deadline) => tokio::time::timeout(deadline, task)
            .await
            .map_err(|_| QuizBankError::Timeout(format!("deadline of {:?} exceeded", deadline)))?,
        None => task.await,
    };
    joined.map_err(|e| QuizBankError::Query(format!("engine task failed: {}", e)))?
}

// =============================================================================
// Bootstrap
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct BootstrapRequest {
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

async fn bootstrap_default_bank(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<BootstrapRequest>>,
) -> Response {
    let caller = match authenticated_user(&headers) {
        Ok(caller) => caller,
        Err(err) => return error_response(&err),
    };
    if caller != user_id {
        return error_response(&QuizBankError::UnauthorizedAccess(format!(
            "path user id {} does not match the authenticated caller",
            user_id
        )));
    }

    let Json(request) = body.unwrap_or_default();
    let cmd = BootstrapCommand {
        user_id,
        user_email: request.user_email,
        metadata: request.metadata,
    };

    let service = state.service.clone();
    match run_engine(&headers, move || service.bootstrap_default_bank(&cmd)).await {
        Ok(outcome) => {
            let bank_id = outcome.bank_id;
            let envelope = ApiResponse::ok(
                "default question bank created",
                serde_json::to_value(&outcome).unwrap_or(json!(null)),
            );
            (
                StatusCode::CREATED,
                [("x-question-bank-id", bank_id.to_string())],
                Json(envelope),
            )
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

// =============================================================================
// Upsert
// =============================================================================

async fn upsert_question(
    State(state): State<AppState>,
    Path((user_id, bank_id)): Path<(i64, i64)>,
    headers: HeaderMap,
    request_id: axum::Extension<RequestId>,
    body: std::result::Result<Json<UpsertQuestionCommand>, JsonRejection>,
) -> Response {
    let Json(mut cmd) = match body {
        Ok(body) => body,
        // Structural binding failures surface in the uniform envelope
        Err(rejection) => {
            return error_response(&QuizBankError::MissingRequiredField(rejection.body_text()))
        }
    };

    let ctx = match command_context(&headers, &request_id.0) {
        Ok(ctx) => ctx,
        Err(err) => return error_response(&err),
    };

    cmd.user_id = user_id;
    cmd.bank_id = bank_id;

    let service = state.service.clone();
    match run_engine(&headers, move || service.upsert_question(&ctx, &cmd)).await {
        Ok(outcome) => {
            let envelope = ApiResponse::ok(
                format!("question {}", outcome.operation.as_str()),
                serde_json::to_value(&outcome).unwrap_or(json!(null)),
            );
            (
                StatusCode::OK,
                [
                    ("x-operation", outcome.operation.as_str().to_string()),
                    ("x-question-id", outcome.question_id.to_string()),
                ],
                Json(envelope),
            )
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

// =============================================================================
// Query
// =============================================================================

/// Raw query string shape. Multi-valued filters arrive comma-separated
/// (`tags=beginner,practice`); multiple sorts are `;`-separated
/// (`sort=title,asc;points,desc`).
#[derive(Debug, Default, Deserialize)]
struct RawQueryParams {
    category_level_1: Option<String>,
    category_level_2: Option<String>,
    category_level_3: Option<String>,
    category_level_4: Option<String>,
    tags: Option<String>,
    quizzes: Option<String>,
    difficulty_level: Option<String>,
    question_type: Option<String>,
    status: Option<String>,
    search: Option<String>,
    page: Option<i64>,
    size: Option<i64>,
    sort: Option<String>,
}

fn split_list(raw: &Option<String>, separator: char) -> Vec<String> {
    raw.as_deref()
        .map(|s| {
            s.split(separator)
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl From<RawQueryParams> for QuestionQueryParams {
    fn from(raw: RawQueryParams) -> Self {
        QuestionQueryParams {
            tags: split_list(&raw.tags, ','),
            quizzes: split_list(&raw.quizzes, ','),
            sort: split_list(&raw.sort, ';'),
            category_level_1: raw.category_level_1,
            category_level_2: raw.category_level_2,
            category_level_3: raw.category_level_3,
            category_level_4: raw.category_level_4,
            difficulty_level: raw.difficulty_level,
            question_type: raw.question_type,
            status: raw.status,
            search: raw.search,
            page: raw.page,
            size: raw.size,
        }
    }
}

async fn query_questions(
    State(state): State<AppState>,
    Path((user_id, bank_id)): Path<(i64, i64)>,
    headers: HeaderMap,
    Query(raw): Query<RawQueryParams>,
) -> Response {
    let caller = match authenticated_user(&headers) {
        Ok(caller) => caller,
        Err(err) => return error_response(&err),
    };
    if caller != user_id {
        return error_response(&QuizBankError::UnauthorizedAccess(format!(
            "path user id {} does not match the authenticated caller",
            user_id
        )));
    }

    let params: QuestionQueryParams = raw.into();
    let service = state.service.clone();
    let result = run_engine(&headers, move || {
        service.query_questions(user_id, bank_id, &params)
    })
    .await;

    match result {
        Ok(page) => {
            let headers = [
                (
                    "x-total-count",
                    page.pagination.total_elements.to_string(),
                ),
                ("x-page-number", page.pagination.current_page.to_string()),
                ("x-page-size", page.pagination.page_size.to_string()),
            ];
            let envelope = ApiResponse::ok(
                "questions retrieved",
                serde_json::to_value(&page).unwrap_or(json!(null)),
            );
            (StatusCode::OK, headers, Json(envelope)).into_response()
        }
        Err(err) => error_response(&err),
    }
}
