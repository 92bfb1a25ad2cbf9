//! Chat endpoints.
//!
//! - `POST /ask` — answer one message, continuing a chat when `chat_id` is set
//! - `POST /stop` — stop whatever is generating
//! - `GET /chats` — stored chats, most recent first
//! - `GET /chats/{id}` — one stored chat

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use lantern_core::engine::GenerationMetadata;
use lantern_core::message::ContentPart;
use lantern_core::store::{ChatId, ChatRecord, Turn};
use lantern_runtime::{
    BudgetSummary, ChatError, ChatOutcome, ChatRequest, NewUserMessage, WorkerError,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::SharedState;

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Base64 image, without the `data:` prefix
    #[serde(default)]
    pub image_data: Option<String>,
    /// Base64 WAV audio
    #[serde(default)]
    pub audio_data: Option<String>,
}

impl AskRequest {
    fn into_chat_request(self) -> ChatRequest {
        let mut attachments = Vec::new();
        if let Some(data) = self.image_data.filter(|d| !d.is_empty()) {
            attachments.push(ContentPart::Image { data });
        }
        if let Some(data) = self.audio_data.filter(|d| !d.is_empty()) {
            attachments.push(ContentPart::Audio { data });
        }
        ChatRequest {
            chat_id: self
                .chat_id
                .filter(|id| !id.trim().is_empty())
                .map(ChatId),
            message: NewUserMessage {
                text: self.text,
                attachments,
            },
            system_prompt: self.system_prompt,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct AskResponse {
    pub reply: String,
    pub chat_id: ChatId,
    pub conversation: Vec<Turn>,
    pub performance: GenerationMetadata,
    pub budget: BudgetSummary,
}

#[derive(Serialize, Deserialize)]
pub struct StoppedResponse {
    pub status: String,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct ChatListResponse {
    pub chats: Vec<ChatRecord>,
}

#[derive(Serialize, Deserialize)]
pub struct ChatDetailResponse {
    pub chat: ChatRecord,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
        ChatError::Budget(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ChatError::Worker(WorkerError::EngineFailure(_)) => StatusCode::BAD_GATEWAY,
        ChatError::Worker(_) | ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

pub async fn ask_handler(
    State(state): State<SharedState>,
    Json(payload): Json<AskRequest>,
) -> Result<Response, ApiError> {
    let request = payload.into_chat_request();
    info!(
        chat_id = ?request.chat_id.as_ref().map(|id| id.0.as_str()),
        chars = request.message.text.len(),
        attachments = request.message.attachments.len(),
        "/ask request"
    );

    match state.service.submit_chat(request).await {
        Ok(ChatOutcome::Reply(reply)) => Ok(Json(AskResponse {
            reply: reply.reply,
            chat_id: reply.chat_id,
            conversation: reply.conversation,
            performance: reply.metadata,
            budget: reply.budget,
        })
        .into_response()),
        Ok(ChatOutcome::Stopped) => Ok(Json(StoppedResponse {
            status: "stopped".into(),
            message: "Processing was stopped".into(),
        })
        .into_response()),
        Err(e) => {
            warn!(error = %e, "/ask failed");
            Err(api_error(status_for(&e), e))
        }
    }
}

pub async fn stop_handler(State(state): State<SharedState>) -> Json<StopResponse> {
    let stopped = state.service.cancel_current().await;
    let message = if stopped {
        "Processing stop requested and process terminated"
    } else {
        "No processing was running"
    };
    Json(StopResponse {
        stopped,
        message: message.into(),
    })
}

pub async fn list_chats_handler(
    State(state): State<SharedState>,
) -> Result<Json<ChatListResponse>, ApiError> {
    let chats = state
        .service
        .store()
        .load_all()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(ChatListResponse { chats }))
}

pub async fn get_chat_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ChatDetailResponse>, ApiError> {
    let chat = state
        .service
        .store()
        .lookup(&ChatId(id))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Chat not found"))?;
    Ok(Json(ChatDetailResponse { chat }))
}
