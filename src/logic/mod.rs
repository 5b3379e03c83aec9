/// Logic Layer
///
/// Turns a node's logic name into a call: the resolver finds where the logic
/// lives, the registry holds in-process handlers, and the loader invokes either
/// kind and normalizes failures.

// Name → location lookup (mapping file, script fallback, registry)
pub mod resolver;

// Canonical handler trait and arity adapters
pub mod registry;

// Invocation with panic and sandbox failure capture
pub mod loader;

// Handlers registered at start
pub mod builtins;

pub use loader::HandlerLoader;
pub use registry::{Handler, HandlerRegistry};
pub use resolver::{HandlerLocation, LogicResolver, ResolveError};
