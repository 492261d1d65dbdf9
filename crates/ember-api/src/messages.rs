use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use ember_types::api::{
    Claims, ConversationResponse, ConversationSummary, ConversationsResponse, SendMessageRequest,
    UnreadCountResponse,
};
use ember_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::run_blocking;

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub skip: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let entries = run_blocking(move || db.list_conversations(claims.sub)).await?;

    let now = chrono::Utc::now();
    Ok(Json(ConversationsResponse {
        conversations: entries
            .into_iter()
            .map(|e| ConversationSummary {
                user_id: e.user.id,
                user: e.user.to_public_profile(now),
                last_message: Some(e.last_message.to_last_message()),
                unread_count: e.unread_count,
            })
            .collect(),
    }))
}

/// Fetch a page of the conversation. Viewing is not reading: the client
/// calls the explicit read route when the chat is actually displayed.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ConversationQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let limit = query.limit.min(100);
    let skip = query.skip;
    let (rows, has_more) =
        run_blocking(move || db.get_conversation(claims.sub, user_id, limit, skip)).await?;

    Ok(Json(ConversationResponse {
        messages: rows.into_iter().map(|m| m.into_response()).collect(),
        has_more,
    }))
}

/// Send a message to a match. The store re-checks the match on every call;
/// the receiver gets a push if they are connected.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let receiver_id = req.receiver_id;
    let row = run_blocking(move || {
        db.send_message(
            claims.sub,
            receiver_id,
            &req.content,
            req.kind,
            req.media_url.as_deref(),
            req.reply_to,
        )
    })
    .await?;

    let message = row.into_response();
    state
        .dispatcher
        .send_to_user(
            receiver_id,
            GatewayEvent::MessageCreate {
                message: message.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    run_blocking(move || db.mark_conversation_read(claims.sub, user_id)).await?;

    // Read receipts: tell the counterpart their messages were seen.
    state
        .dispatcher
        .send_to_user(
            user_id,
            GatewayEvent::ConversationRead {
                reader_id: claims.sub,
            },
        )
        .await;

    Ok(Json(json!({ "message": "Conversation marked as read" })))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    run_blocking(move || db.soft_delete_message(claims.sub, message_id)).await?;
    Ok(Json(json!({ "message": "Message deleted successfully" })))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let unread_count = run_blocking(move || db.unread_total(claims.sub)).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}
