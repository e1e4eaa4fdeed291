//! Conversation endpoints
//!
//! Synchronous counterparts of the gateway operations. Sending over REST
//! publishes exactly like sending over the WebSocket.

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::state::AppState;
use crate::store::MarkRead;
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(alias = "receiverId")]
    pub receiver_id: Uuid,
    #[serde(alias = "content")]
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message_id: i64,
    /// False when the message had already been read
    pub marked: bool,
}

/// **Endpoint**: `GET /api/chats`
#[get("/api/chats")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let overview = state.chat.overview(user.id).await?;
    Ok(HttpResponse::Ok().json(overview))
}

/// Opening a conversation also marks the counterpart's messages read.
///
/// **Endpoint**: `GET /api/chats/{counterpart_id}`
#[get("/api/chats/{counterpart_id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    counterpart_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let view = state
        .chat
        .fetch_conversation(user.id, counterpart_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// **Endpoint**: `POST /api/chats`
#[post("/api/chats")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    request: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    let view = state
        .chat
        .send(user.id, request.receiver_id, &request.body)
        .await?;
    Ok(HttpResponse::Created().json(view))
}

/// Hide the thread for the caller only
///
/// **Endpoint**: `POST /api/chats/leave/{counterpart_id}`
#[post("/api/chats/leave/{counterpart_id}")]
pub async fn leave_conversation(
    state: web::Data<AppState>,
    user: User,
    counterpart_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state.chat.leave(user.id, counterpart_id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// **Endpoint**: `POST /api/chats/messages/{message_id}/read`
#[post("/api/chats/messages/{message_id}/read")]
pub async fn mark_message_read(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let message_id = message_id.into_inner();
    let outcome = state.chat.mark_read(user.id, message_id).await?;
    Ok(HttpResponse::Ok().json(MarkReadResponse {
        message_id,
        marked: matches!(outcome, MarkRead::Marked { .. }),
    }))
}
