//! HTTP route handlers for the conversation store API.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::chat::identity::{ConversationId, MessageId, ParticipantId};
use crate::chat::message::{Fallback, RawMessage};
use crate::error::ChatError;
use crate::store::DeleteRequest;
use crate::store::http::PARTICIPANT_HEADER;

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/getConversation", get(get_conversation))
        .route("/api/sendMessage", post(send_message))
        .route("/api/deleteMessage", post(delete_message))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "halldyll-chat-store",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Response envelope shared by the API endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Whether the request succeeded.
    pub status: bool,
    /// Payload, when the endpoint returns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable outcome.
    pub message: Option<String>,
}

type Reply<T> = (StatusCode, Json<Envelope<T>>);

fn fail<T>(code: StatusCode, reason: impl Into<String>) -> Reply<T> {
    (
        code,
        Json(Envelope {
            status: false,
            data: None,
            message: Some(reason.into()),
        }),
    )
}

fn rejection_reason(err: &ChatError) -> String {
    match err {
        ChatError::Remote {
            reason: Some(reason),
            ..
        } => reason.clone(),
        other => other.to_string(),
    }
}

/// Query parameters of the load endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    /// Conversation to load.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// List a conversation in store order.
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConversationQuery>,
) -> Reply<Vec<RawMessage>> {
    let Some(raw) = query.conversation_id.filter(|id| !id.trim().is_empty()) else {
        return fail(StatusCode::BAD_REQUEST, "Conversation ID is required");
    };

    let id = ConversationId::from_wire(raw);
    let data = state
        .store
        .messages(&id)
        .iter()
        .map(RawMessage::from_record)
        .collect();

    (
        StatusCode::OK,
        Json(Envelope {
            status: true,
            data: Some(data),
            message: None,
        }),
    )
}

/// Store a message and echo it back with its id and timestamp.
///
/// Accepts any of the known field-name variants. A missing conversation id
/// is derived from the participants.
async fn send_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RawMessage>, JsonRejection>,
) -> Response {
    let raw = match payload {
        Ok(Json(raw)) => raw,
        Err(rejection) => {
            return fail::<()>(StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    let explicit_conversation = raw
        .conversation_id
        .as_deref()
        .is_some_and(|id| !id.trim().is_empty());
    let unset = ConversationId::from_wire("");
    let mut record = match raw.into_record(Fallback::Conversation(&unset)) {
        Ok(record) => record,
        Err(err) => return fail::<()>(StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    if !explicit_conversation {
        record.conversation_id = ConversationId::between(&record.sender_id, &record.recipient_id);
    }
    record.message_id = None;

    match state.store.insert(&record) {
        Ok(stored) => (StatusCode::OK, Json(RawMessage::from_record(&stored))).into_response(),
        Err(err) => fail::<()>(StatusCode::BAD_REQUEST, rejection_reason(&err)).into_response(),
    }
}

/// Body of a delete request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageBody {
    /// Message to remove.
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Delete a message on behalf of the participant named in the header.
async fn delete_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<DeleteMessageBody>, JsonRejection>,
) -> Reply<()> {
    let requester = headers
        .get(PARTICIPANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| ParticipantId::parse(value).ok());
    let Some(requested_by) = requester else {
        return fail(StatusCode::UNAUTHORIZED, "Not authenticated");
    };

    let message_id = payload
        .ok()
        .and_then(|Json(body)| body.message_id)
        .unwrap_or_default();
    let request = DeleteRequest {
        message_id: MessageId::new(message_id),
        requested_by,
    };

    match state.store.remove(&request) {
        Ok(()) => (
            StatusCode::OK,
            Json(Envelope {
                status: true,
                data: None,
                message: Some("Message deleted".to_string()),
            }),
        ),
        Err(err) => fail(StatusCode::BAD_REQUEST, rejection_reason(&err)),
    }
}
