//! Conversation session
//!
//! Holds the transcript of one live exchange with an agent and folds the
//! decoded event stream into it. Messages are keyed by a locally generated
//! correlation id, so optimistic entries are reconciled in place when the
//! gateway confirms persistence, regardless of arrival order relative to
//! other transcript changes.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::Stream;
use futures::StreamExt;
use uuid::Uuid;

use crate::stream::StreamEvent;

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

/// Idle timeout between events, from `SESSION_IDLE_TIMEOUT_SECS`
pub fn idle_timeout() -> Duration {
    let secs = std::env::var("SESSION_IDLE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    Principal,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pending,
    Streaming,
    Complete,
    Failed,
}

/// One transcript entry
#[derive(Debug, Clone)]
pub struct SessionMessage {
    pub correlation_id: String,
    pub persisted_id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    pub state: MessageState,
}

/// State machine for one streaming exchange
pub struct ConversationSession {
    transcript: Vec<SessionMessage>,
    // correlation id -> transcript index of the unconfirmed principal message
    pending: HashMap<String, usize>,
    thoughts: Vec<String>,
    active_agent: Option<usize>,
    failure: Option<String>,
    finished: bool,
    closed: bool,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            transcript: Vec::new(),
            pending: HashMap::new(),
            thoughts: Vec::new(),
            active_agent: None,
            failure: None,
            finished: false,
            closed: false,
        }
    }

    /// Record the principal's outgoing message optimistically, before the
    /// gateway confirms it. Returns the correlation id to send upstream.
    pub fn send(&mut self, content: &str) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        self.send_with_correlation(&correlation_id, content);
        correlation_id
    }

    /// Same as [`send`](Self::send), with a caller-supplied correlation id
    /// (a client that already rendered the message optimistically sends its
    /// own id so the confirmation reaches both ends).
    pub fn send_with_correlation(&mut self, correlation_id: &str, content: &str) {
        self.transcript.push(SessionMessage {
            correlation_id: correlation_id.to_string(),
            persisted_id: None,
            role: MessageRole::Principal,
            content: content.to_string(),
            state: MessageState::Pending,
        });
        self.pending
            .insert(correlation_id.to_string(), self.transcript.len() - 1);
    }

    /// Fold one decoded event into the transcript. No-op after close.
    pub fn apply(&mut self, event: StreamEvent) {
        if self.closed {
            return;
        }

        match event {
            StreamEvent::UserMessageSaved(saved) => {
                let slot = saved
                    .correlation_id
                    .as_ref()
                    .and_then(|cid| self.pending.remove(cid));
                match slot {
                    Some(idx) => {
                        let message = &mut self.transcript[idx];
                        message.persisted_id = Some(saved.id);
                        message.state = MessageState::Complete;
                    }
                    None => {
                        // Confirmation for a message this session never sent
                        self.transcript.push(SessionMessage {
                            correlation_id: saved
                                .correlation_id
                                .unwrap_or_else(|| Uuid::new_v4().to_string()),
                            persisted_id: Some(saved.id),
                            role: MessageRole::Principal,
                            content: saved.content,
                            state: MessageState::Complete,
                        });
                    }
                }
            }
            StreamEvent::Message { content } | StreamEvent::Artifact { content } => {
                let idx = self.active_agent_index();
                let message = &mut self.transcript[idx];
                message.content.push_str(&content);
                message.state = MessageState::Streaming;
            }
            StreamEvent::Thought { content } => {
                self.thoughts.push(content);
            }
            StreamEvent::AgentMessageSaved(saved) => {
                let idx = self.active_agent_index();
                let message = &mut self.transcript[idx];
                message.persisted_id = Some(saved.id);
                // The persisted record wins over the streamed concatenation;
                // keep the local buffer only when the frame carries no content
                if !saved.content.is_empty() {
                    message.content = saved.content;
                }
                message.state = MessageState::Complete;
                self.active_agent = None;
                self.finished = true;
            }
            StreamEvent::Error { content } => {
                if let Some(idx) = self.active_agent {
                    self.transcript[idx].state = MessageState::Failed;
                }
                self.failure = Some(content);
                self.active_agent = None;
                self.finished = true;
            }
            StreamEvent::Done => {
                self.finished = true;
            }
            StreamEvent::Unknown { event_type, .. } => {
                tracing::debug!("Ignoring unknown stream event: {}", event_type);
            }
        }
    }

    /// Abort the exchange. The upstream request is cancelled by dropping
    /// the stream; any events still in flight are ignored.
    pub fn close(&mut self) {
        self.closed = true;
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transcript(&self) -> &[SessionMessage] {
        &self.transcript
    }

    pub fn thoughts(&self) -> &[String] {
        &self.thoughts
    }

    /// Terminal failure text, from an `error` event or a timeout
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// The agent's completed reply, if the exchange finished cleanly
    pub fn final_reply(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Agent && m.state == MessageState::Complete)
            .map(|m| m.content.as_str())
    }

    fn active_agent_index(&mut self) -> usize {
        match self.active_agent {
            Some(idx) => idx,
            None => {
                self.transcript.push(SessionMessage {
                    correlation_id: Uuid::new_v4().to_string(),
                    persisted_id: None,
                    role: MessageRole::Agent,
                    content: String::new(),
                    state: MessageState::Pending,
                });
                let idx = self.transcript.len() - 1;
                self.active_agent = Some(idx);
                idx
            }
        }
    }
}

/// Drive a session to its terminal event, enforcing the idle timeout
/// between events. Silence past the timeout becomes a terminal failure.
pub async fn drain(
    session: &mut ConversationSession,
    mut events: Pin<Box<dyn Stream<Item = StreamEvent> + Send>>,
    idle: Duration,
) {
    while !session.is_finished() {
        match tokio::time::timeout(idle, events.next()).await {
            Ok(Some(event)) => session.apply(event),
            Ok(None) => {
                // Stream ended without a terminal event
                session.apply(StreamEvent::Error {
                    content: "Stream ended unexpectedly".to_string(),
                });
            }
            Err(_) => {
                session.apply(StreamEvent::Error {
                    content: format!("No activity for {} seconds", idle.as_secs()),
                });
            }
        }
    }
    // Dropping `events` here aborts the upstream request
}
