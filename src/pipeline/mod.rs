/// Pipeline Definition Layer
///
/// Type definitions for nodes, pipelines, triggers and run records, plus the
/// webhook token store that binds a token to its pipeline.

// Core pipeline type definitions
pub mod types;

// Token → pipeline store (in-memory and SQLite)
pub mod store;

pub use store::{MemoryTokenStore, SqliteTokenStore, StoreError, TokenStore, WebhookRegistration};
pub use types::{
    ExecutionContext, Node, NodeError, NodeFlags, NodeOutcome, NodeResult, Params, Pipeline,
    PipelineRegistration, Trigger, TriggerKind, TriggerMeta, TriggerSpec,
};
