//! Event stream decoder for the agent gateway's SSE protocol
//!
//! The gateway emits newline-delimited `data: <json>` frames separated by
//! blank lines, with a literal `data: [DONE]` marker closing the stream.
//! Each JSON payload is internally tagged with a `type` field.

use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A decoded event from the agent's response stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The principal's message was persisted upstream
    UserMessageSaved(SavedMessage),
    /// A chunk of the agent's visible reply
    Message { content: String },
    /// A chunk of produced work output, appended like message content
    Artifact { content: String },
    /// Internal reasoning, surfaced out-of-band and never part of the reply
    Thought { content: String },
    /// The agent's full reply was persisted upstream
    AgentMessageSaved(SavedMessage),
    /// The agent failed mid-exchange; terminal
    Error { content: String },
    /// End-of-stream marker
    Done,
    /// Unrecognized event type, carried through for logging
    Unknown { event_type: String, data: String },
}

/// Persisted message payload carried by the `*_saved` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Parse one SSE data payload into a typed event
pub(crate) fn parse_frame(data: &str) -> Result<StreamEvent> {
    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }

    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| AppError::Gateway(format!("Malformed stream frame: {}", e)))?;

    let event_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| AppError::Gateway("Stream frame missing type field".to_string()))?;

    match event_type {
        "user_message_saved" => {
            let saved = parse_saved(&value)?;
            Ok(StreamEvent::UserMessageSaved(saved))
        }
        "agent_message_saved" => {
            let saved = parse_saved(&value)?;
            Ok(StreamEvent::AgentMessageSaved(saved))
        }
        "message" => Ok(StreamEvent::Message {
            content: content_of(&value),
        }),
        "artifact" => Ok(StreamEvent::Artifact {
            content: content_of(&value),
        }),
        "thought" => Ok(StreamEvent::Thought {
            content: content_of(&value),
        }),
        "error" => Ok(StreamEvent::Error {
            content: content_of(&value),
        }),
        other => Ok(StreamEvent::Unknown {
            event_type: other.to_string(),
            data: data.to_string(),
        }),
    }
}

fn parse_saved(value: &serde_json::Value) -> Result<SavedMessage> {
    let data = value
        .get("data")
        .ok_or_else(|| AppError::Gateway("Saved-message frame missing data field".to_string()))?;
    serde_json::from_value(data.clone())
        .map_err(|e| AppError::Gateway(format!("Malformed saved-message payload: {}", e)))
}

/// Encode an event back into one SSE frame for downstream re-emission
pub fn encode_frame(event: &StreamEvent) -> String {
    let payload = match event {
        StreamEvent::Done => return "data: [DONE]\n\n".to_string(),
        StreamEvent::Unknown { data, .. } => return format!("data: {}\n\n", data),
        StreamEvent::UserMessageSaved(saved) => {
            serde_json::json!({"type": "user_message_saved", "data": saved})
        }
        StreamEvent::AgentMessageSaved(saved) => {
            serde_json::json!({"type": "agent_message_saved", "data": saved})
        }
        StreamEvent::Message { content } => {
            serde_json::json!({"type": "message", "content": content})
        }
        StreamEvent::Artifact { content } => {
            serde_json::json!({"type": "artifact", "content": content})
        }
        StreamEvent::Thought { content } => {
            serde_json::json!({"type": "thought", "content": content})
        }
        StreamEvent::Error { content } => {
            serde_json::json!({"type": "error", "content": content})
        }
    };
    format!("data: {}\n\n", payload)
}

fn content_of(value: &serde_json::Value) -> String {
    value
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Decode a gateway response body into a stream of typed events.
///
/// Malformed frames are logged and skipped. A transport failure before a
/// terminal event is surfaced as a synthetic `Error` event, so consumers
/// always observe a terminal event before the stream ends.
pub fn decode_sse(response: reqwest::Response) -> impl Stream<Item = StreamEvent> + Send {
    use futures::StreamExt;

    async_stream::stream! {
        let mut bytes_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut data = String::new();

        'outer: while let Some(chunk) = bytes_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Stream transport failure: {}", e);
                    yield StreamEvent::Error {
                        content: format!("Stream interrupted: {}", e),
                    };
                    break;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete lines
            while let Some(newline_pos) = buffer.find('\n') {
                let line = buffer[..newline_pos].trim_end_matches('\r').to_string();
                buffer = buffer[newline_pos + 1..].to_string();

                if line.is_empty() {
                    // Empty line signals end of frame
                    if !data.is_empty() {
                        let frame = std::mem::take(&mut data);
                        match parse_frame(&frame) {
                            Ok(StreamEvent::Done) => {
                                yield StreamEvent::Done;
                                break 'outer;
                            }
                            Ok(event) => yield event,
                            Err(e) => {
                                tracing::warn!("Skipping malformed frame: {}", e);
                            }
                        }
                    }
                } else if let Some(value) = line.strip_prefix("data:") {
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(value.trim());
                }
            }
        }
    }
}
