/// Node Dispatcher
///
/// Executes one node. Inline nodes (logic `inline`, or `params.inline = true`)
/// send `params.code` to the sandbox; every other node is resolved by name and
/// handed to the loader. A pass-through node starts from the empty value
/// instead of its predecessor's output. Failures never escape: they come back
/// as `NodeOutcome::Err`.

use crate::logic::{HandlerLoader, LogicResolver};
use crate::pipeline::types::{ExecutionContext, Node, NodeError, NodeOutcome};
use crate::sandbox::{SandboxClient, SandboxRequest};
use serde_json::Value;
use std::sync::Arc;

/// Logic name marking a node as inline code
pub const INLINE_LOGIC: &str = "inline";

/// Param that marks any node as inline
pub const INLINE_PARAM: &str = "inline";

/// Param carrying inline source code
pub const CODE_PARAM: &str = "code";

/// Param overriding the sandbox wall-clock timeout, in seconds
pub const TIMEOUT_PARAM: &str = "timeout_seconds";

#[derive(Clone)]
pub struct NodeDispatcher {
    resolver: LogicResolver,
    loader: HandlerLoader,
    sandbox: Arc<dyn SandboxClient>,
}

impl NodeDispatcher {
    pub fn new(resolver: LogicResolver, loader: HandlerLoader, sandbox: Arc<dyn SandboxClient>) -> Self {
        Self {
            resolver,
            loader,
            sandbox,
        }
    }

    pub fn is_inline(node: &Node) -> bool {
        node.logic == INLINE_LOGIC || node.params.get(INLINE_PARAM).and_then(Value::as_bool) == Some(true)
    }

    pub async fn dispatch(&self, node: &Node, prev: Value, ctx: &ExecutionContext) -> NodeOutcome {
        let inline = Self::is_inline(node);
        let prev = if node.flags.pass_through { Value::Null } else { prev };

        if inline {
            let code = match node.params.get(CODE_PARAM) {
                Some(Value::String(code)) => code,
                _ => return NodeOutcome::Err(NodeError::new("missing code").with_detail("node", node.id.as_str())),
            };
            if code.trim().is_empty() {
                return NodeOutcome::Err(NodeError::new("empty code").with_detail("kind", "empty_code"));
            }

            let request = SandboxRequest::inline(
                code.as_str(),
                coerce_prev(prev),
                Value::Object(node.params.clone()),
                ctx.payload.clone(),
            )
            .with_timeout_seconds(node.params.get(TIMEOUT_PARAM).and_then(Value::as_f64));

            tracing::debug!("🧪 Node '{}' running inline code", node.id);
            return match self.sandbox.run(request).await {
                Ok(response) => NodeOutcome::Sandbox(response),
                Err(e) => NodeOutcome::Err(e.into()),
            };
        }

        let prev = coerce_prev(prev);
        let location = match self.resolver.resolve(&node.logic).await {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!("🔍 Node '{}': {}", node.id, e);
                return NodeOutcome::Err(NodeError::new(e.to_string()).with_detail("logic", node.logic.as_str()));
            }
        };

        tracing::debug!("⚙️ Node '{}' dispatching to {:?}", node.id, location);
        match self.loader.invoke(&location, &prev, &node.params, &ctx.payload).await {
            Ok(value) => NodeOutcome::Ok(value),
            Err(e) => NodeOutcome::Err(e.with_detail("logic", node.logic.as_str())),
        }
    }
}

/// Parse a string `prev` that looks like serialized JSON; otherwise leave it as is
pub fn coerce_prev(prev: Value) -> Value {
    match prev {
        Value::String(s) => {
            let trimmed = s.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                serde_json::from_str(&s).unwrap_or(Value::String(s))
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}
