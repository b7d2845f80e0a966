//! Vework server - task orchestration and streaming chat for virtual
//! employee teams

pub mod api;
pub mod delegate;
pub mod error;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod session;
pub mod store;
pub mod stream;
pub mod task;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::delegate::DelegationRelay;
use crate::gateway::AgentGatewayClient;
use crate::notify::ChangeNotifier;
use crate::store::Store;
use crate::task::{PlanGate, TaskStateMachine};

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub notifier: ChangeNotifier,
    pub machine: TaskStateMachine,
    pub plan_gate: PlanGate,
    pub relay: DelegationRelay,
    pub gateway: Arc<AgentGatewayClient>,
}

impl AppState {
    pub fn new(pool: SqlitePool, gateway_url: impl Into<String>) -> Arc<Self> {
        let store = Store::new(pool);
        let notifier = ChangeNotifier::new();
        let gateway = Arc::new(AgentGatewayClient::new(gateway_url));
        let machine = TaskStateMachine::new(store.clone(), notifier.clone());
        let plan_gate = PlanGate::new(machine.clone());
        let relay = DelegationRelay::new(store.clone(), gateway.clone());

        Arc::new(Self {
            store,
            notifier,
            machine,
            plan_gate,
            relay,
            gateway,
        })
    }
}
