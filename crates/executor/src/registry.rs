use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// The pluggable work behind a tool name. Handlers are opaque to the
/// executor: they take JSON args and a trace id and either produce a
/// JSON-serializable result or fail. Internals (and their error types)
/// stay behind `anyhow`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, args: Value, trace_id: &str) -> anyhow::Result<Value>;
}

/// Adapter so plain async closures can be registered without a newtype.
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value, String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, args: Value, trace_id: &str) -> anyhow::Result<Value> {
        (self.f)(args, trace_id.to_string()).await
    }
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Name-to-handler bindings, populated during startup wiring.
/// Re-registering a name replaces the previous binding (last-write-wins,
/// kept for dev hot-swap) and logs loudly.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn register(&mut self, tool_name: &str, handler: Arc<dyn Handler>) {
        if self
            .handlers
            .insert(tool_name.to_string(), handler)
            .is_some()
        {
            warn!("handler for {tool_name:?} re-registered; previous binding replaced");
        }
    }

    pub fn get(&self, tool_name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(tool_name).cloned()
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
