//! HTTP client for the external agent gateway

use futures::stream::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::stream::{decode_sse, StreamEvent};

/// Client for the agent gateway: streams chat exchanges and relays
/// synchronous delegation calls.
pub struct AgentGatewayClient {
    client: Client,
    base_url: String,
}

impl AgentGatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Send a message to an agent and stream the decoded response events
    pub async fn send_message(
        &self,
        agent_id: Uuid,
        request: ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>> {
        let response = self
            .client
            .post(format!("{}/agents/{}/messages", self.base_url, agent_id))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Gateway(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Failed to send message: {} - {}",
                status, text
            )));
        }

        Ok(Box::pin(decode_sse(response)))
    }
}

// Request/Response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Outcome shape returned by the delegation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationReply {
    pub target_agent_name: String,
    pub response: String,
}
