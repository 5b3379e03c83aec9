/// Handler registry
///
/// Explicit map from logic name to a handler object. Every handler exposes one
/// canonical call, `invoke(prev, params, payload)`; handlers written against
/// fewer arguments are wrapped in an adapter when they are registered, so
/// nothing downstream ever inspects arity.

use crate::pipeline::types::Params;
use anyhow::Result;
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};

/// A registered unit of node logic
pub trait Handler: Send + Sync {
    fn invoke(&self, prev: &Value, params: &Params, payload: &Value) -> Result<Value>;
}

/// Full-signature closure
struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Value, &Params, &Value) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, prev: &Value, params: &Params, payload: &Value) -> Result<Value> {
        (self.0)(prev, params, payload)
    }
}

/// Legacy `(params, payload)` handler
struct ParamsPayload<F>(F);

impl<F> Handler for ParamsPayload<F>
where
    F: Fn(&Params, &Value) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, _prev: &Value, params: &Params, payload: &Value) -> Result<Value> {
        (self.0)(params, payload)
    }
}

/// Legacy `(payload)` handler
struct PayloadOnly<F>(F);

impl<F> Handler for PayloadOnly<F>
where
    F: Fn(&Value) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, _prev: &Value, _params: &Params, payload: &Value) -> Result<Value> {
        (self.0)(payload)
    }
}

/// Legacy no-argument handler
struct Nullary<F>(F);

impl<F> Handler for Nullary<F>
where
    F: Fn() -> Result<Value> + Send + Sync,
{
    fn invoke(&self, _prev: &Value, _params: &Params, _payload: &Value) -> Result<Value> {
        (self.0)()
    }
}

/// Logic name → handler
///
/// Populated at process start and read-only afterwards; shared behind an `Arc`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry").field("handlers", &self.names()).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::logic::builtins::register_all(&mut registry);
        registry
    }

    /// Register a handler object; a later registration under the same name wins
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!("⚠️ Handler '{}' registered twice, keeping the latest", name);
        }
        self
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Value, &Params, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)))
    }

    pub fn register_params_payload<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Params, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(ParamsPayload(f)))
    }

    pub fn register_payload<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(PayloadOnly(f)))
    }

    pub fn register_nullary<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(Nullary(f)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
