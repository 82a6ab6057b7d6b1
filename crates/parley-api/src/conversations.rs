use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use parley_types::api::{
    Claims, ConversationResponse, CreateConversationResponse, InviteMemberRequest,
    MessageResponse, SendMessageRequest,
};
use parley_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    /// Highest message seq the client has already seen; only strictly
    /// newer messages are returned.
    #[serde(default)]
    pub after: i64,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let creator = claims.sub.to_string();
    let id = tokio::task::spawn_blocking(move || db.db.create_conversation(&creator))
        .await
        .map_err(ApiError::join)??;

    let conversation_id = id
        .parse()
        .map_err(|_| ApiError::Internal("generated conversation id is malformed".into()))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse { conversation_id }),
    ))
}

pub async fn invite_member(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<InviteMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let acting = claims.sub.to_string();
    let cid = conversation_id.to_string();
    let target = req.user_id.to_string();
    tokio::task::spawn_blocking(move || db.db.add_member(&acting, &cid, &target))
        .await
        .map_err(ApiError::join)??;

    // Best-effort nudge so the invited user refreshes their conversation list
    state
        .dispatcher
        .send_to_user(req.user_id, GatewayEvent::ConversationJoined { conversation_id })
        .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user_id = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.conversations_for_user(&user_id))
        .await
        .map_err(ApiError::join)??;

    let conversations: Vec<ConversationResponse> = rows
        .into_iter()
        .map(|row| ConversationResponse {
            conversation_id: parse_uuid(&row.id, "conversation id"),
            member_count: row.member_count.max(0) as u32,
            message_count: row.message_count.max(0) as u64,
            last_message: row.last_message,
            last_message_user_id: row
                .last_message_user_id
                .as_deref()
                .map(|id| parse_uuid(id, "last message user id")),
            last_message_sent_on: row
                .last_message_sent_on
                .as_deref()
                .map(|ts| parse_timestamp(ts, "conversation summary")),
            created_at: parse_timestamp(&row.created_at, "conversation summary"),
        })
        .collect();

    Ok(Json(conversations))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Run blocking DB write off the async runtime; membership check,
    // message insert and summary update commit as one transaction
    let db = state.clone();
    let sender = claims.sub.to_string();
    let cid = conversation_id.to_string();
    let content = req.content.clone();
    let (seq, sent_at) =
        tokio::task::spawn_blocking(move || db.db.append_message(&sender, &cid, &content))
            .await
            .map_err(ApiError::join)??;

    // Post-commit push. The event carries no content; subscribed clients
    // refetch over HTTP. A push failure never unwinds the stored message.
    state
        .dispatcher
        .broadcast(GatewayEvent::MessageNew { conversation_id });

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            seq,
            conversation_id,
            sender_id: claims.sub,
            sender_username: claims.username.clone(),
            content: req.content,
            sent_at,
        }),
    ))
}

pub async fn list_new_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user_id = claims.sub.to_string();
    let cid = conversation_id.to_string();
    let rows =
        tokio::task::spawn_blocking(move || db.db.messages_since(&user_id, &cid, query.after))
            .await
            .map_err(ApiError::join)??;

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .map(|row| MessageResponse {
            seq: row.seq,
            conversation_id: parse_uuid(&row.conversation_id, "conversation id"),
            sender_id: parse_uuid(&row.sender_id, "sender id"),
            sender_username: row.sender_username,
            content: row.content,
            sent_at: parse_timestamp(&row.sent_at, "message"),
        })
        .collect();

    Ok(Json(messages))
}

fn parse_uuid(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", context, raw, e);
        Uuid::default()
    })
}

/// Timestamps we write are RFC 3339, but rows created through SQLite column
/// defaults carry "YYYY-MM-DD HH:MM:SS" without timezone. Parse as naive
/// UTC in that case.
fn parse_timestamp(raw: &str, context: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on {}: {}", raw, context, e);
            chrono::DateTime::default()
        })
}
