//! Tool registration and batched dispatch.
//!
//! Tools are declared as data ([`ToolSpec`]) and implemented separately
//! ([`ToolHandler`]); only the declarations ever reach the model service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ToolCall, ToolResult};

/// Declared shape of a callable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema `properties` map describing the arguments.
    pub parameters: serde_json::Value,
    /// Names of required arguments.
    pub required: Vec<String>,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        required: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            required: required.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Render a spec as the wire's function-declaration object.
pub fn to_function_declaration(spec: &ToolSpec) -> serde_json::Value {
    serde_json::json!({
        "name": spec.name,
        "description": spec.description,
        "parameters": {
            "type": "object",
            "properties": spec.parameters,
            "required": spec.required,
        },
    })
}

/// Error surfaced by a tool implementation. Turned into an error payload
/// for the model rather than aborting the batch.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("{0}")]
    Failed(String),
}

/// Implementation side of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Async closures taking the raw args value are handlers.
#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<serde_json::Value, ToolError>> + Send,
{
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        (self)(args).await
    }
}

struct ToolEntry {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of callable tools.
///
/// Registration is last-writer-wins: re-registering a name replaces both
/// the spec and the handler.
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        if self.entries.contains_key(&spec.name) {
            debug!(tool = %spec.name, "replacing registered tool");
        }
        self.entries
            .insert(spec.name.clone(), ToolEntry { spec, handler });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Declarations to advertise to the model, sorted by name so session
    /// requests are stable.
    pub fn declarations(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.entries.values().map(|e| e.spec.clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Execute a batch of calls concurrently.
    ///
    /// Always yields exactly one result per call, in call order; a
    /// failing or unknown tool becomes an error payload instead of
    /// aborting the rest of the batch.
    pub async fn dispatch(&self, batch: &[ToolCall]) -> Vec<ToolResult> {
        join_all(batch.iter().map(|call| self.dispatch_one(call))).await
    }

    async fn dispatch_one(&self, call: &ToolCall) -> ToolResult {
        let Some(entry) = self.entries.get(&call.name) else {
            warn!(tool = %call.name, "call for unregistered tool");
            return ToolResult::error(call, format!("unknown tool: {}", call.name));
        };

        debug!(tool = %call.name, id = %call.id, "dispatching tool call");
        match entry.handler.call(call.args.clone()).await {
            Ok(payload) => ToolResult::ok(call, payload),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool call failed");
                ToolResult::error(call, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    fn echo_handler() -> Arc<dyn ToolHandler> {
        Arc::new(|args: serde_json::Value| async move {
            Ok(serde_json::json!({ "echo": args["value"] }))
        })
    }

    #[test]
    fn declarations_are_sorted_and_carry_no_handler() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("zeta", "Z tool.", serde_json::json!({}), &[]),
            echo_handler(),
        );
        registry.register(
            ToolSpec::new("alpha", "A tool.", serde_json::json!({}), &[]),
            echo_handler(),
        );

        let specs = registry.declarations();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "alpha");
        assert_eq!(specs[1].name, "zeta");

        // the serialized spec is pure data
        let dump = serde_json::to_value(&specs[0]).unwrap();
        let fields = dump.as_object().unwrap();
        assert_eq!(fields.len(), 4);
        for key in ["name", "description", "parameters", "required"] {
            assert!(fields.contains_key(key), "missing field {key}");
        }
    }

    #[test]
    fn function_declaration_folds_required_into_schema() {
        let spec = ToolSpec::new(
            "get_weather",
            "Weather lookup.",
            serde_json::json!({ "city": { "type": "string" } }),
            &["city"],
        );
        let decl = to_function_declaration(&spec);
        assert_eq!(decl["name"], "get_weather");
        assert_eq!(decl["parameters"]["type"], "object");
        assert_eq!(decl["parameters"]["properties"]["city"]["type"], "string");
        assert_eq!(decl["parameters"]["required"][0], "city");
    }

    #[tokio::test]
    async fn reregistering_a_name_replaces_the_handler() {
        let mut registry = ToolRegistry::new();
        let spec = ToolSpec::new("answer", "Answers.", serde_json::json!({}), &[]);
        registry.register(
            spec.clone(),
            Arc::new(|_args: serde_json::Value| async move { Ok(serde_json::json!("old")) }),
        );
        registry.register(
            spec,
            Arc::new(|_args: serde_json::Value| async move { Ok(serde_json::json!("new")) }),
        );
        assert_eq!(registry.len(), 1);

        let results = registry
            .dispatch(&[call("c1", "answer", serde_json::json!({}))])
            .await;
        assert_eq!(results[0].payload, serde_json::json!("new"));
    }

    #[tokio::test]
    async fn batch_yields_one_result_per_call_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new(
                "echo",
                "Echo.",
                serde_json::json!({ "value": { "type": "string" } }),
                &["value"],
            ),
            echo_handler(),
        );
        registry.register(
            ToolSpec::new("boom", "Always fails.", serde_json::json!({}), &[]),
            Arc::new(|_args: serde_json::Value| async move {
                Err::<serde_json::Value, _>(ToolError::Failed("exploded".into()))
            }),
        );

        let batch = [
            call("a", "echo", serde_json::json!({ "value": "1" })),
            call("b", "boom", serde_json::json!({})),
            call("c", "missing", serde_json::json!({})),
        ];
        let results = registry.dispatch(&batch).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].payload["echo"], "1");
        assert_eq!(results[1].id, "b");
        assert!(results[1].is_error());
        assert_eq!(results[1].payload["message"], "exploded");
        assert_eq!(results[2].id, "c");
        assert!(results[2].is_error());
        assert_eq!(results[2].payload["message"], "unknown tool: missing");
    }
}
