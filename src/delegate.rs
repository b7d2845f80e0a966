//! Delegation relay
//!
//! Lets one agent hand a sub-task to a teammate on the same customer's
//! roster. The relay opens a nested conversation session against the
//! target and flattens the outcome into plain text the calling agent can
//! reason about. Target-side failures are results, not faults; the only
//! hard error is an unresolvable customer identity.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::gateway::{AgentGatewayClient, ChatRequest};
use crate::session::{drain, idle_timeout, ConversationSession};
use crate::store::Store;

/// Maximum delegation chain depth; bounds runaway agent-to-agent loops
pub const MAX_DELEGATION_DEPTH: usize = 5;

/// One delegation hop, as requested by the source agent
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub source_agent_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub target_agent_id: Uuid,
    pub task: String,
    pub depth: usize,
}

#[derive(Clone)]
pub struct DelegationRelay {
    store: Store,
    gateway: Arc<AgentGatewayClient>,
}

impl DelegationRelay {
    pub fn new(store: Store, gateway: Arc<AgentGatewayClient>) -> Self {
        Self { store, gateway }
    }

    /// Relay a task to the target agent and wait for its full response.
    ///
    /// Returns the textual result for the calling agent. `Err` is reserved
    /// for a missing customer id, which fails fast without any network call.
    pub async fn delegate(&self, request: DelegationRequest) -> Result<String> {
        let customer_id = request.customer_id.ok_or_else(|| {
            AppError::InvalidArgument(
                "No customer id available, delegation cannot be authorized".to_string(),
            )
        })?;

        if request.depth >= MAX_DELEGATION_DEPTH {
            tracing::warn!(
                depth = request.depth,
                "Delegation chain depth limit reached"
            );
            return Ok(format!(
                "Delegation failed: maximum delegation depth of {} exceeded",
                MAX_DELEGATION_DEPTH
            ));
        }

        let agent = match self.store.get_agent(request.target_agent_id).await {
            Ok(agent) if agent.customer_id == customer_id => agent,
            Ok(_) | Err(AppError::NotFound(_)) => {
                return Ok(
                    "Delegation failed: target agent not found for this customer".to_string(),
                );
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            source = ?request.source_agent_id,
            target = %agent.id,
            depth = request.depth,
            "Delegating task"
        );

        let mut session = ConversationSession::new();
        let correlation_id = session.send(&request.task);

        let chat = ChatRequest {
            content: request.task.clone(),
            subject: Some("Delegated task".to_string()),
            correlation_id: Some(correlation_id),
        };
        let events = match self.gateway.send_message(agent.id, chat).await {
            Ok(events) => events,
            Err(e) => return Ok(format!("Delegation failed: {}", e)),
        };

        drain(&mut session, events, idle_timeout()).await;

        match (session.final_reply(), session.failure()) {
            (Some(reply), _) => Ok(format!(
                "Delegation successful. {} responded:\n\n{}",
                agent.name, reply
            )),
            (None, Some(reason)) => Ok(format!("Delegation failed: {}", reason)),
            (None, None) => Ok("Delegation failed: no response received".to_string()),
        }
    }
}
