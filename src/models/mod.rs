//! Wire models shared by the HTTP and WebSocket surfaces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

// ============================================================================
// Topic name validation
// ============================================================================

/// Topic names are 1..255 characters and alphanumeric once `-` and `_` are
/// stripped. The same rule applies everywhere a topic name appears.
pub fn validate_topic_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > 255 {
        return Err(ValidationError::new("topic_name_length")
            .with_message("Topic name must be 1-255 characters".into()));
    }
    let stripped: String = name.chars().filter(|c| *c != '-' && *c != '_').collect();
    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::new("topic_name_charset").with_message(
            "Topic must contain only alphanumeric characters, hyphens, and underscores".into(),
        ));
    }
    Ok(())
}

// ============================================================================
// Message ingestion
// ============================================================================

/// Incoming message from a producer.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PublishRequest {
    #[validate(custom(function = "validate_topic_name"))]
    pub topic: String,
    /// Message payload; must be a JSON object.
    pub payload: Map<String, Value>,
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message_id: String,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkPublishRequest {
    #[validate(
        length(min = 1, max = 100, message = "Bulk requests carry 1-100 messages"),
        nested
    )]
    pub messages: Vec<PublishRequest>,
}

#[derive(Debug, Serialize)]
pub struct BulkMessageResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub topic: String,
    /// `"accepted"` or `"rejected"`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkSummary {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, Serialize)]
pub struct BulkPublishResponse {
    pub results: Vec<BulkMessageResult>,
    pub summary: BulkSummary,
}

// ============================================================================
// Stored messages and pagination
// ============================================================================

/// A message as retained by the per-topic log. Immutable after append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub message_id: String,
    pub topic: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedMessagesResponse {
    pub messages: Vec<StoredMessage>,
    pub total: usize,
    pub limit: usize,
    pub order: String,
    pub cursor: Option<String>,
    pub next_cursor: Option<String>,
}

// ============================================================================
// Long polling
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct PollRequest {
    #[validate(length(min = 1, message = "At least one topic required"))]
    pub topics: Vec<String>,
    /// Last message ID seen per topic, for catching up on missed messages.
    pub since: Option<BTreeMap<String, String>>,
    #[serde(default = "default_poll_timeout")]
    #[validate(range(min = 1, max = 60, message = "Timeout must be 1-60 seconds"))]
    pub timeout: u64,
}

fn default_poll_timeout() -> u64 {
    30
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub messages: Vec<Value>,
    /// Whether more messages might be immediately available (catch-up page
    /// was full).
    pub has_more: bool,
}

// ============================================================================
// WebSocket frames
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SubscribeFrame {
    #[validate(length(min = 1, max = 50, message = "Subscribe to 1-50 topics"))]
    pub topics: Vec<String>,
    #[validate(length(min = 1, max = 255, message = "client_id must be 1-255 characters"))]
    pub client_id: String,
    /// `"last"`, `"earliest"`, or a specific message id. Accepted for
    /// forward compatibility; replay is served by the poll and history
    /// endpoints.
    #[serde(default = "default_offset")]
    pub offset: String,
}

fn default_offset() -> String {
    "last".into()
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeFrame {
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AckFrame {
    pub message_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubscribedFrame {
    pub r#type: &'static str,
    pub topics: Vec<String>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnsubscribedFrame {
    pub r#type: &'static str,
    pub topics: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PongFrame {
    pub r#type: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorFrame {
    pub r#type: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        ErrorFrame {
            r#type: "error",
            code,
            message: message.into(),
        }
    }
}

/// Render the event delivered to every subscriber (WS and long-poll) for a
/// freshly published message.
pub fn message_event(
    message_id: &str,
    topic: &str,
    payload: &Map<String, Value>,
    timestamp: DateTime<Utc>,
    metadata: Option<&BTreeMap<String, String>>,
) -> Value {
    let mut event = serde_json::json!({
        "type": "message",
        "message_id": message_id,
        "topic": topic,
        "payload": payload,
        "timestamp": timestamp,
    });
    if let Some(meta) = metadata {
        event["metadata"] = serde_json::to_value(meta).unwrap_or(Value::Null);
    }
    event
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: BTreeMap<String, String>,
}
