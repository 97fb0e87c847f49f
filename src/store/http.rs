//! HTTP/JSON binding of the conversation store.
//!
//! Endpoints, relative to the configured base URL:
//! - `GET api/getConversation?conversationId=...`
//! - `POST api/sendMessage`
//! - `POST api/deleteMessage`
//!
//! Responses come in several envelope shapes; the parsing helpers below
//! reduce them to [`RawMessage`]s before normalization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::chat::identity::{ConversationId, MessageId};
use crate::chat::message::{Fallback, MessageRecord, RawMessage};
use crate::config::StoreConfig;
use crate::error::{ChatError, ChatResult};

use super::{ConversationStore, DeleteRequest, StoreFuture};

/// Header naming the participant on whose behalf a request is made.
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

/// Path of the load endpoint.
pub const LOAD_PATH: &str = "api/getConversation";
/// Path of the append endpoint.
pub const APPEND_PATH: &str = "api/sendMessage";
/// Path of the delete endpoint.
pub const DELETE_PATH: &str = "api/deleteMessage";

#[derive(Clone, Debug)]
struct Endpoints {
    load: Url,
    append: Url,
    delete: Url,
}

impl Endpoints {
    fn resolve(mut base: Url) -> ChatResult<Self> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            load: base.join(LOAD_PATH)?,
            append: base.join(APPEND_PATH)?,
            delete: base.join(DELETE_PATH)?,
        })
    }
}

/// Body of a delete request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBody {
    /// Message to remove.
    pub message_id: MessageId,
}

/// Status envelope returned by the delete endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusEnvelope {
    /// Whether the store accepted the request.
    pub status: bool,
    /// Optional human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Conversation store reached over HTTP.
#[derive(Clone, Debug)]
pub struct HttpConversationStore {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpConversationStore {
    /// Create a store client from configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &StoreConfig) -> ChatResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .build()
            .map_err(|e| ChatError::Config(format!("HTTP client error: {e}")))?;
        Self::with_client(client, config.url()?)
    }

    /// Create a store client around an existing `reqwest::Client`.
    ///
    /// # Errors
    /// Returns an error if the endpoint URLs cannot be derived from `base`.
    pub fn with_client(client: reqwest::Client, base: Url) -> ChatResult<Self> {
        Ok(Self {
            client,
            endpoints: Endpoints::resolve(base)?,
        })
    }

    async fn load(&self, id: &ConversationId) -> ChatResult<Vec<MessageRecord>> {
        debug!(conversation = %id, "Loading conversation");
        let response = self
            .client
            .get(self.endpoints.load.clone())
            .query(&[("conversationId", id.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(ChatError::remote(Some(status.as_u16()), Some(reason)));
        }

        let body: Value = response.json().await?;
        let raws = parse_load_body(body)?;
        Ok(normalize_loaded(raws, id))
    }

    async fn append(&self, record: &MessageRecord) -> ChatResult<MessageRecord> {
        debug!(conversation = %record.conversation_id, "Appending message");
        let response = self
            .client
            .post(self.endpoints.append.clone())
            .header(PARTICIPANT_HEADER, record.sender_id.as_str())
            .json(&RawMessage::from_record(record))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(ChatError::remote(Some(status.as_u16()), Some(reason)));
        }

        let body: Value = response.json().await?;
        parse_append_body(body)?
            .into_record(Fallback::Pending(record))
            .map_err(|e| ChatError::remote(Some(status.as_u16()), Some(e.to_string())))
    }

    async fn delete(&self, request: &DeleteRequest) -> ChatResult<()> {
        debug!(message = %request.message_id, "Deleting message");
        let response = self
            .client
            .post(self.endpoints.delete.clone())
            .header(PARTICIPANT_HEADER, request.requested_by.as_str())
            .json(&DeleteBody {
                message_id: request.message_id.clone(),
            })
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        interpret_delete(status.as_u16(), status.is_success(), &text)
    }
}

impl ConversationStore for HttpConversationStore {
    fn load_conversation<'a>(
        &'a self,
        id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<Vec<MessageRecord>>> {
        Box::pin(self.load(id))
    }

    fn append_message<'a>(
        &'a self,
        record: &'a MessageRecord,
    ) -> StoreFuture<'a, ChatResult<MessageRecord>> {
        Box::pin(self.append(record))
    }

    fn delete_message<'a>(&'a self, request: &'a DeleteRequest) -> StoreFuture<'a, ChatResult<()>> {
        Box::pin(self.delete(request))
    }
}

/// Extract the reason from an envelope whose `status` is `false`.
fn rejected_envelope(body: &Map<String, Value>) -> Option<ChatError> {
    if body.get("status").and_then(Value::as_bool) == Some(false) {
        let reason = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Some(ChatError::remote(None, reason));
    }
    None
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> ChatResult<T> {
    serde_json::from_value(value)
        .map_err(|e| ChatError::remote(None, Some(format!("malformed response: {e}"))))
}

/// Decode a message list entry by entry, dropping entries that do not
/// decode.
fn decode_list(value: Value) -> ChatResult<Vec<RawMessage>> {
    let Value::Array(items) = value else {
        return Err(ChatError::remote(
            None,
            Some("malformed response: expected a message list".to_string()),
        ));
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!(%err, "Dropping undecodable message");
                None
            }
        })
        .collect())
}

/// Reduce a load response to its raw messages.
///
/// Accepts a bare array, or an envelope carrying the list under `data` or
/// `messages`. A missing or null list is an empty conversation. Entries
/// whose fields have unexpected types are dropped.
///
/// # Errors
/// Returns `Remote` for a rejected envelope or a list that is not an array.
pub fn parse_load_body(body: Value) -> ChatResult<Vec<RawMessage>> {
    match body {
        list @ Value::Array(_) => decode_list(list),
        Value::Object(mut map) => {
            if let Some(err) = rejected_envelope(&map) {
                return Err(err);
            }
            let list = map
                .remove("data")
                .filter(|v| !v.is_null())
                .or_else(|| map.remove("messages"))
                .unwrap_or(Value::Null);
            match list {
                Value::Null => Ok(Vec::new()),
                other => decode_list(other),
            }
        }
        Value::Null => Ok(Vec::new()),
        _ => Err(ChatError::remote(
            None,
            Some("malformed response: expected a message list".to_string()),
        )),
    }
}

/// Reduce an append response to the stored raw message.
///
/// Accepts an envelope whose `data` is an object or a one-element array, an
/// envelope whose `message` is an object, or a bare message.
///
/// # Errors
/// Returns `Remote` for a rejected envelope or an unusable body.
pub fn parse_append_body(body: Value) -> ChatResult<RawMessage> {
    let Value::Object(mut map) = body else {
        return Err(ChatError::remote(
            None,
            Some("malformed response: expected a message object".to_string()),
        ));
    };
    if let Some(err) = rejected_envelope(&map) {
        return Err(err);
    }

    match map.remove("data") {
        Some(Value::Array(items)) => {
            let first = items.into_iter().next().ok_or_else(|| {
                ChatError::remote(None, Some("malformed response: empty data".to_string()))
            })?;
            return decode(first);
        }
        Some(data @ Value::Object(_)) => return decode(data),
        Some(Value::Null) | None => {}
        Some(other) => {
            map.insert("data".to_string(), other);
        }
    }

    if map.get("message").is_some_and(Value::is_object) {
        if let Some(inner) = map.remove("message") {
            return decode(inner);
        }
    }

    decode(Value::Object(map))
}

/// Turn a delete response into a result.
///
/// The status envelope is authoritative when present, whatever the HTTP
/// status says.
///
/// # Errors
/// Returns `Remote` carrying the store's reason when the delete was refused.
pub fn interpret_delete(code: u16, success: bool, text: &str) -> ChatResult<()> {
    match serde_json::from_str::<StatusEnvelope>(text) {
        Ok(StatusEnvelope { status: true, .. }) => Ok(()),
        Ok(StatusEnvelope { message, .. }) => Err(ChatError::remote(Some(code), message)),
        Err(_) if success => Err(ChatError::remote(
            Some(code),
            Some("malformed response".to_string()),
        )),
        Err(_) => Err(ChatError::remote(Some(code), None)),
    }
}

fn normalize_loaded(raws: Vec<RawMessage>, id: &ConversationId) -> Vec<MessageRecord> {
    raws.into_iter()
        .filter_map(|raw| match raw.into_record(Fallback::Conversation(id)) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(conversation = %id, %err, "Dropping malformed message");
                None
            }
        })
        .collect()
}
