/// Sandbox Layer
///
/// Runs untrusted programs in a bounded child process. The parent side
/// (executor, clients) lives in the server; the child side runs in the same
/// binary started in sandbox child mode.

// Wire types shared by the child, the executor and the HTTP service
pub mod types;

// Failures that prevent a response
pub mod error;

// Parent side: spawn, bound, capture
pub mod executor;

// Child side: restricted Lua host
pub mod child;

// In-process and remote transports
pub mod client;

pub use client::{client_from_config, LocalSandbox, RemoteSandbox, SandboxClient};
pub use error::SandboxError;
pub use executor::SandboxExecutor;
pub use types::{SandboxMode, SandboxRequest, SandboxResponse, RESOURCE_EXCEEDED_ERROR, TIMEOUT_ERROR};
