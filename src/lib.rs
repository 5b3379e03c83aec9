/// Pipewright: trigger-driven sequential pipelines
///
/// Pipelines are ordered node lists bound to a trigger (webhook, one-shot
/// time, or interval). Each run executes its nodes in order, chaining every
/// node's output into the next, with inline code isolated in a resource-bounded
/// sandbox process.

// Core configuration and setup
pub mod config;

// SQLite connection and schema
pub mod db;

// Pipeline data model and the webhook token store
pub mod pipeline;

// Isolated child-process execution of untrusted code
pub mod sandbox;

// Logic name resolution, registered handlers and script loading
pub mod logic;

// Durable run queue and recurring schedules
pub mod queue;

// Trigger registration, node dispatch, run execution and workers
pub mod runtime;

// HTTP API layer - registration, webhook delivery, run lookup, sandbox service
pub mod api;

// Server setup and initialization
pub mod server;

#[cfg(test)]
mod testing;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use pipeline::{Node, NodeOutcome, NodeResult, Pipeline, PipelineRegistration, Trigger};
pub use runtime::{PipelineRunner, RunReport, TriggerScheduler};
pub use server::{start_sandbox_service, start_server};
