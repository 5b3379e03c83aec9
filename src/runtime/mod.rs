/// Runtime
///
/// Everything that turns registrations into executed runs:
/// - trigger registration and webhook delivery
/// - per-node dispatch to inline code, scripts and registered handlers
/// - sequential run execution with result chaining
/// - the worker pool draining the queue

// Executes a single node
pub mod dispatcher;

// Runs a pipeline's nodes in order
pub mod runner;

// Trigger registration and webhook delivery
pub mod scheduler;

// Queue-polling workers
pub mod worker;

pub use dispatcher::NodeDispatcher;
pub use runner::{PipelineRunner, RunFailure, RunReport};
pub use scheduler::{DeliveryAccepted, DeliveryError, RegistrationError, RegistrationResult, TriggerScheduler};
pub use worker::WorkerPool;
