use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

use crate::{
    api::{
        dto::*,
        rate_limiter::{rate_limit_middleware, RateLimiter},
    },
    auth::{AuthProvider, CurrentUser},
    config::Config,
    models::internal::{ConversationMessage, MessageRole, SearchDocument},
    orchestrator::{validate_turn, ConsultationOrchestrator},
    services::{
        document_search::DocumentSearchClient,
        llm::{estimate_text_tokens, EmbeddingClient},
    },
    storage::repository::ConversationStore,
};

/// Usage-log feature tag for direct legal searches.
pub const LEGAL_SEARCH_FEATURE: &str = "legal_search";

const DEFAULT_SEARCH_LIMIT: u32 = 10;
const MAX_SEARCH_LIMIT: u32 = 50;
const DEFAULT_LIST_LIMIT: u64 = 20;
const MAX_LIST_LIMIT: u64 = 100;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<dyn AuthProvider>,
    pub orchestrator: Arc<ConsultationOrchestrator>,
    pub store: Arc<dyn ConversationStore>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub search: Arc<dyn DocumentSearchClient>,
    pub rate_limiter: RateLimiter,
}

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: status.as_u16() as u32,
        }),
    )
}

#[derive(OpenApi)]
#[openapi(
    paths(consultation_stream, legal_search, list_conversations, get_conversation),
    components(schemas(
        ConsultationRequest,
        ConversationMessage,
        MessageRole,
        LegalSearchRequest,
        LegalSearchResponse,
        SearchDocument,
        ConversationSummaryDto,
        ConversationListResponse,
        ConversationDetailResponse,
        ErrorResponse
    )),
    info(title = "Macau Law Knowledge Base API")
)]
pub struct ApiDoc;

/// Streams one consultation turn as server-sent events.
#[utoipa::path(
    post,
    path = "/api/ai/consultation/stream",
    request_body = ConsultationRequest,
    responses(
        (status = 200, description = "text/event-stream of step, response_chunk, error and completion events"),
        (status = 400, description = "Invalid message", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 402, description = "Insufficient token balance", body = ErrorResponse),
        (status = 403, description = "Tier does not allow this request", body = ErrorResponse)
    )
)]
pub async fn consultation_stream(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<ConsultationRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let Json(request) =
        payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    let turn = validate_turn(user, request, state.orchestrator.settings()).map_err(|e| {
        tracing::debug!("Consultation rejected: {}", e);
        api_error(e.status(), e.to_string())
    })?;

    let receiver = state.orchestrator.start(turn);
    let events = futures::stream::unfold(receiver, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .map(|event| Event::default().json_data(&event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn method_not_allowed() -> ApiError {
    api_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

#[utoipa::path(
    post,
    path = "/api/legal-search",
    request_body = LegalSearchRequest,
    responses(
        (status = 200, description = "Documents ranked by similarity", body = LegalSearchResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 402, description = "Token balance exhausted", body = ErrorResponse)
    )
)]
pub async fn legal_search(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<LegalSearchRequest>, JsonRejection>,
) -> Result<Json<LegalSearchResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    let query = req.query.trim();
    if query.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Query must not be empty"));
    }
    if query.chars().count() > state.config.max_message_chars {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Query exceeds {} characters", state.config.max_message_chars),
        ));
    }

    let required = estimate_text_tokens(query);
    if user.remaining_tokens < required {
        return Err(api_error(
            StatusCode::PAYMENT_REQUIRED,
            format!(
                "Insufficient token balance: {} required, {} remaining",
                required, user.remaining_tokens
            ),
        ));
    }

    let limit = req
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT) as usize;

    let embedding = state.embeddings.generate_embedding(query).await.map_err(|e| {
        tracing::error!("Query embedding failed: {}", e);
        api_error(StatusCode::BAD_GATEWAY, "Embedding service unavailable")
    })?;

    let documents = state
        .search
        .search_documents(&embedding.values, limit)
        .await
        .map_err(|e| {
            tracing::error!("Legal search failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, "Document search unavailable")
        })?;

    let tokens_used = embedding.token_count;
    if let Err(e) = state.store.record_token_usage(&user.id, tokens_used).await {
        tracing::warn!(user_id = %user.id, "Failed to update token ledger: {}", e);
    }
    if let Err(e) = state
        .store
        .log_usage(&user.id, LEGAL_SEARCH_FEATURE, tokens_used)
        .await
    {
        tracing::warn!(user_id = %user.id, "Failed to write usage log (ignored): {}", e);
    }

    tracing::info!(
        user_id = %user.id,
        hits = documents.len(),
        tokens_used,
        "Legal search completed"
    );

    Ok(Json(LegalSearchResponse {
        documents,
        tokens_used,
        remaining_tokens: user.remaining_tokens.saturating_sub(tokens_used),
    }))
}

#[utoipa::path(
    get,
    path = "/api/conversations",
    params(("limit" = Option<u64>, Query, description = "Maximum conversations returned (default 20)")),
    responses(
        (status = 200, description = "Caller's conversations, newest first", body = ConversationListResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn list_conversations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<ListParams>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let conversations = state
        .store
        .list_conversations(&user.id, limit)
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to fetch conversations: {}", e),
            )
        })?;

    Ok(Json(ConversationListResponse {
        conversations: conversations.iter().map(ConversationSummaryDto::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{id}",
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation with messages", body = ConversationDetailResponse),
        (status = 404, description = "Conversation not found", body = ErrorResponse)
    )
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, ApiError> {
    let conversation = state
        .store
        .find_conversation(&user.id, &id)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match conversation {
        Some(c) => Ok(Json(c.into())),
        None => Err(api_error(StatusCode::NOT_FOUND, "Conversation not found")),
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn create_router(state: AppState) -> Router {
    let consultation = Router::new()
        .route(
            "/api/ai/consultation/stream",
            post(consultation_stream).fallback(method_not_allowed),
        )
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    let router = Router::new()
        .merge(consultation)
        .route("/api/legal-search", post(legal_search))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/{id}", get(get_conversation))
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http());

    if state.config.cors_enabled {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}
