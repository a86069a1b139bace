//! Conversation and message data model.
//!
//! The serde form (camelCase, `type` tag on messages) is also the
//! import/export wire format, so field renames here are contract changes.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::enums::MessageType;
use crate::error::SyncError;

/// A titled, ordered sequence of messages owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub message_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// One turn (user or assistant) within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_used: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Value>,
}

/// Client-side message id: millisecond timestamp + random hex suffix.
/// Collision-resistant within a conversation, sortable by creation time.
pub fn new_message_id(now: DateTime<Utc>) -> String {
    format!("{}-{:08x}", now.timestamp_millis(), rand::random::<u32>())
}

impl Conversation {
    /// Create a new empty conversation owned by `user_id`.
    pub fn new(user_id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            messages: Vec::new(),
            message_count: 0,
            created_at: now,
            updated_at: now,
            last_activity: now,
            is_archived: false,
            tags: Vec::new(),
        }
    }

    /// Append a message, keeping the count/timestamp invariants.
    ///
    /// A message whose id is already present is skipped (returns false) —
    /// merge paths may legitimately offer the same message twice and it must
    /// never appear twice in the sequence.
    pub fn push_message(&mut self, msg: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        let at = msg.timestamp;
        self.messages.push(msg);
        self.message_count = self.messages.len() as u32;
        self.touch(at);
        true
    }

    /// Advance `updated_at`/`last_activity` without ever moving them backward.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        let at = at.max(Utc::now());
        self.updated_at = self.updated_at.max(at);
        self.last_activity = self.last_activity.max(at);
    }

    /// Structural validator for untrusted payloads (imports, RPC responses).
    ///
    /// Accepts a raw JSON value and returns a typed conversation only if the
    /// shape holds: `id`/`userId`/`title` strings, every message carrying
    /// `id`/`message`/`type`/`timestamp` with a date-coercible timestamp.
    /// Date-like fields are coerced from string or epoch-millis forms.
    pub fn from_untrusted(value: &Value) -> Result<Conversation, SyncError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SyncError::Validation("conversation entry is not an object".into()))?;

        let id = require_string(obj, "id")?;
        let user_id = require_string(obj, "userId")?;
        let title = obj
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Validation("title must be a string".into()))?
            .to_string();

        let raw_messages = match obj.get("messages") {
            None | Some(Value::Null) => &[] as &[Value],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                return Err(SyncError::Validation("messages must be an array".into()));
            }
        };

        let mut messages = Vec::with_capacity(raw_messages.len());
        for raw in raw_messages {
            messages.push(message_from_untrusted(raw, &id)?);
        }

        let now = Utc::now();
        let created_at = coerce_datetime(obj.get("createdAt")).unwrap_or(now);
        let updated_at = coerce_datetime(obj.get("updatedAt")).unwrap_or(created_at);
        let last_activity = coerce_datetime(obj.get("lastActivity")).unwrap_or(updated_at);

        let tags = obj
            .get("tags")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let message_count = messages.len() as u32;
        Ok(Conversation {
            id,
            user_id,
            title,
            messages,
            message_count,
            created_at,
            updated_at,
            last_activity,
            is_archived: obj
                .get("isArchived")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            tags,
        })
    }
}

impl ChatMessage {
    /// Create a user-authored message for `conversation_id`.
    pub fn user(conversation_id: &str, text: &str) -> Self {
        Self::with_kind(conversation_id, text, MessageType::User)
    }

    /// Create an assistant message for `conversation_id`.
    pub fn ai(conversation_id: &str, text: &str) -> Self {
        Self::with_kind(conversation_id, text, MessageType::Ai)
    }

    fn with_kind(conversation_id: &str, text: &str, kind: MessageType) -> Self {
        let now = Utc::now();
        Self {
            id: new_message_id(now),
            kind,
            message: text.to_string(),
            timestamp: now,
            conversation_id: conversation_id.to_string(),
            tokens_used: None,
            image_url: None,
            image_id: None,
            mode: None,
            specialty: None,
            advanced_mode: None,
            search_used: None,
            search_results: None,
        }
    }
}

fn require_string(
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<String, SyncError> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SyncError::Validation(format!("{key} must be a non-empty string")))
}

fn message_from_untrusted(value: &Value, conversation_id: &str) -> Result<ChatMessage, SyncError> {
    let obj = value
        .as_object()
        .ok_or_else(|| SyncError::Validation("message entry is not an object".into()))?;

    let id = require_string(obj, "id")?;
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Validation("message body must be a string".into()))?
        .to_string();
    let kind: MessageType = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Validation("message type must be a string".into()))?
        .parse()
        .map_err(|_| SyncError::Validation("message type must be 'user' or 'ai'".into()))?;
    let timestamp = coerce_datetime(obj.get("timestamp"))
        .ok_or_else(|| SyncError::Validation("message timestamp is not a date".into()))?;

    Ok(ChatMessage {
        id,
        kind,
        message,
        timestamp,
        conversation_id: conversation_id.to_string(),
        tokens_used: obj
            .get("tokensUsed")
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        image_url: string_field(obj, "imageUrl"),
        image_id: string_field(obj, "imageId"),
        mode: string_field(obj, "mode"),
        specialty: string_field(obj, "specialty"),
        advanced_mode: obj.get("advancedMode").and_then(Value::as_bool),
        search_used: obj.get("searchUsed").and_then(Value::as_bool),
        search_results: obj.get("searchResults").cloned(),
    })
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Coerce a serialized date — RFC 3339 string or epoch milliseconds — to UTC.
fn coerce_datetime(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
