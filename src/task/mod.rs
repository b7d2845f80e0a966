//! Task lifecycle: status table, state machine, plan approval

pub mod machine;
pub mod plan;
pub mod status;

pub use machine::TaskStateMachine;
pub use plan::PlanGate;
pub use status::TaskStatus;
