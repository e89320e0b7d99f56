//! HTTP request handlers

use super::types::{
    AssistantListResponse, AssistantResponse, ChatRequest, ClearQuery, ErrorResponse, HistoryResponse,
    MessageResponse, ModelsResponse, ReplyResponse,
};
use super::webhook::{receive_webhook, verify_webhook};
use super::AppState;
use crate::db::{ConversationPreview, DbError, NewAssistant, PublicMessage};
use crate::extract::Artifact;
use crate::runtime::{TurnError, TurnOutcome, TurnRequest};
use crate::state_machine::TurnErrorKind;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Largest accepted upload, audio included
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Turns and clearing
        .route("/api/chat", post(send_chat).delete(clear_chat))
        .route(
            "/api/chat/upload",
            post(upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        // Conversation directory
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/:id/messages", get(get_messages))
        // Assistant directory
        .route("/api/assistant", post(create_assistant).get(list_assistants))
        .route("/api/assistants/:id", get(get_assistant))
        // Messaging bridge
        .route("/api/webhook", get(verify_webhook).post(receive_webhook))
        // Model info
        .route("/api/models", get(list_models))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Turns
// ============================================================

async fn send_chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Result<Response, AppError> {
    let request = TurnRequest::new(req.conversation_id, req.assistant_id, req.message, None)?;
    let outcome = state.runtime.run_turn(request).await?;
    Ok(outcome_response(outcome))
}

async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, AppError> {
    let mut conversation_id = None;
    let mut assistant_id = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let media_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {e}")))?;
                file = Some(Artifact::new(file_name, media_type, bytes.to_vec()));
            }
            Some("conversationId") => conversation_id = Some(field_text(field).await?),
            Some("assistantId") => assistant_id = Some(field_text(field).await?),
            _ => {}
        }
    }

    let Some(file) = file else {
        return Err(AppError::BadRequest("No file uploaded.".to_string()));
    };
    tracing::info!(file = %file.name, bytes = file.bytes.len(), "File upload received");

    let request = TurnRequest::new(conversation_id, assistant_id, None, Some(file))?;
    let outcome = state.runtime.run_turn(request).await?;
    Ok(outcome_response(outcome))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid form field: {e}")))
}

fn outcome_response(outcome: TurnOutcome) -> Response {
    match outcome {
        TurnOutcome::Replied { conversation_id, reply } => Json(ReplyResponse {
            reply,
            conversation_id,
        })
        .into_response(),
        TurnOutcome::History {
            conversation_id,
            messages,
        } => Json(HistoryResponse {
            conversation_id,
            messages,
        })
        .into_response(),
    }
}

async fn clear_chat(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<MessageResponse>, AppError> {
    let Some(conversation_id) = query.conversation_id.filter(|id| !id.trim().is_empty()) else {
        return Err(AppError::BadRequest("Conversation ID is required".to_string()));
    };
    state.runtime.clear(&conversation_id).await?;
    Ok(Json(MessageResponse {
        message: "Conversation cleared successfully".to_string(),
    }))
}

// ============================================================
// Conversation Directory
// ============================================================

async fn list_conversations(State(state): State<AppState>) -> Result<Json<Vec<ConversationPreview>>, AppError> {
    Ok(Json(state.db.list_conversations()?))
}

async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PublicMessage>>, AppError> {
    Ok(Json(state.db.get_public_messages(&id)?))
}

// ============================================================
// Assistant Directory
// ============================================================

async fn create_assistant(
    State(state): State<AppState>,
    Json(fields): Json<NewAssistant>,
) -> Result<(StatusCode, Json<AssistantResponse>), AppError> {
    let assistant = state.db.create_assistant(&fields)?;
    tracing::info!(assistant_id = %assistant.id, model = %assistant.model, "Assistant created");
    Ok((StatusCode::CREATED, Json(AssistantResponse { assistant })))
}

async fn list_assistants(State(state): State<AppState>) -> Result<Json<AssistantListResponse>, AppError> {
    Ok(Json(AssistantListResponse {
        assistants: state.db.list_assistants()?,
    }))
}

async fn get_assistant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AssistantResponse>, AppError> {
    Ok(Json(AssistantResponse {
        assistant: state.db.get_assistant(&id)?,
    }))
}

// ============================================================
// Model Info
// ============================================================

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.llm_registry.available_model_info(),
        default: state.llm_registry.default_model_id().to_string(),
    })
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("assistant-hub ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

pub(super) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
    Turn(TurnError),
}

impl From<TurnError> for AppError {
    fn from(e: TurnError) -> Self {
        AppError::Turn(e)
    }
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        AppError::Turn(e.into())
    }
}

fn turn_status(kind: TurnErrorKind) -> StatusCode {
    match kind {
        TurnErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        TurnErrorKind::NotFound => StatusCode::NOT_FOUND,
        TurnErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        TurnErrorKind::ExtractionError => StatusCode::UNPROCESSABLE_ENTITY,
        TurnErrorKind::ProviderError => StatusCode::BAD_GATEWAY,
        TurnErrorKind::StorageError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
            AppError::Turn(e) => (turn_status(e.kind), e.kind.as_str(), e.message),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), kind, error = %message, "Request failed");
        }

        let body = Json(ErrorResponse::new(message, kind));
        (status, body).into_response()
    }
}
