/// Sandbox failures that prevent a response from being produced
///
/// A child that ran and failed (non-zero exit, timeout, resource ceiling) is not
/// an error here; it is a `SandboxResponse` with `ok = false`.

use crate::pipeline::types::NodeError;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("empty code")]
    EmptyCode,

    #[error("failed to prepare sandbox program: {0}")]
    Artifact(#[source] std::io::Error),

    #[error("failed to spawn sandbox child: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("sandbox child wait failed: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed to encode sandbox input: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sandbox service unreachable: {0}")]
    Transport(String),

    #[error("sandbox service rejected request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
}

impl SandboxError {
    /// Short machine-readable category recorded on the node outcome
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::EmptyCode => "empty_code",
            SandboxError::Artifact(_) | SandboxError::Spawn(_) | SandboxError::Wait(_) => "spawn",
            SandboxError::Encode(_) => "encode",
            SandboxError::Transport(_) => "transport",
            SandboxError::Rejected { .. } => "rejected",
        }
    }
}

impl From<SandboxError> for NodeError {
    fn from(e: SandboxError) -> Self {
        NodeError::new(e.to_string()).with_detail("kind", e.kind())
    }
}
