//! Local Function Registry
//!
//! Maps function names to asynchronous handlers. One registry instance is
//! built at startup and shared by reference with every call site, so the
//! functions advertised to the agent and the functions that can actually be
//! dispatched always agree.

use async_trait::async_trait;
use deepgram_agent::FunctionDefinition;
use futures::future::{BoxFuture, FutureExt};
use schemars::JsonSchema;
use serde_json::Value;
use std::{collections::BTreeMap, future::Future, sync::Arc};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error("Function \"{0}\" not implemented.")]
    NotImplemented(String),
    #[error("Error executing local function \"{name}\": {source}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// An asynchronous request/response delegate for one local function.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn call(&self, input: Value) -> anyhow::Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> FunctionHandler for FnHandler<F>
where
    F: Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync,
{
    async fn call(&self, input: Value) -> anyhow::Result<Value> {
        (self.0)(input).await
    }
}

struct RegisteredFunction {
    definition: FunctionDefinition,
    handler: Arc<dyn FunctionHandler>,
}

#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `definition.name`, replacing any previous one.
    pub fn register(
        &mut self,
        definition: FunctionDefinition,
        handler: impl FunctionHandler + 'static,
    ) -> &mut Self {
        let name = definition.name.clone();
        let previous = self.functions.insert(
            name.clone(),
            RegisteredFunction {
                definition,
                handler: Arc::new(handler),
            },
        );
        if previous.is_some() {
            warn!(function_name = %name, "Replacing previously registered function");
        }
        self
    }

    /// Registers an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, definition: FunctionDefinition, f: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(definition, FnHandler(move |input| f(input).boxed()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// The capability list advertised in the session configuration, ordered by name.
    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        self.functions
            .values()
            .map(|f| f.definition.clone())
            .collect()
    }

    /// Looks up `name` and awaits its handler. Nothing is retried.
    pub async fn invoke(&self, name: &str, input: Value) -> Result<Value, FunctionError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| FunctionError::NotImplemented(name.to_string()))?;
        debug!(function_name = name, "Invoking local function");
        function
            .handler
            .call(input)
            .await
            .map_err(|source| FunctionError::Failed {
                name: name.to_string(),
                source,
            })
    }
}

/// Derives a function's `parameters` JSON Schema from its argument type.
pub fn parameters_schema<T: JsonSchema>() -> Value {
    match serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default() {
        Value::Object(mut schema) => {
            schema.remove("$schema");
            schema.remove("title");
            Value::Object(schema)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use serde_json::json;

    fn definition(name: &str) -> FunctionDefinition {
        FunctionDefinition {
            name: name.to_string(),
            description: format!("The {name} function."),
            parameters: json!({ "type": "object" }),
        }
    }

    #[tokio::test]
    async fn test_invoke_awaits_handler_with_input() {
        let mut handler = MockFunctionHandler::new();
        handler
            .expect_call()
            .with(eq(json!({ "item": "Fries" })))
            .times(1)
            .returning(|_| Ok(json!("ok")));

        let mut registry = FunctionRegistry::new();
        registry.register(definition("add_item"), handler);

        let output = registry
            .invoke("add_item", json!({ "item": "Fries" }))
            .await
            .unwrap();
        assert_eq!(output, json!("ok"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_function() {
        let registry = FunctionRegistry::new();
        let err = registry.invoke("missing", Value::Null).await.unwrap_err();

        assert!(matches!(&err, FunctionError::NotImplemented(name) if name == "missing"));
        assert_eq!(err.to_string(), "Function \"missing\" not implemented.");
    }

    #[tokio::test]
    async fn test_handler_failure_is_wrapped() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn(definition("explode"), |_| async {
            Err(anyhow::anyhow!("kitchen closed"))
        });

        let err = registry.invoke("explode", Value::Null).await.unwrap_err();
        match err {
            FunctionError::Failed { name, source } => {
                assert_eq!(name, "explode");
                assert_eq!(source.to_string(), "kitchen closed");
            }
            other => panic!("expected a handler failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_fn_closure() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn(definition("echo"), |input| async move { Ok(input) });

        assert!(registry.contains("echo"));
        assert_eq!(
            registry.invoke("echo", json!([1, 2])).await.unwrap(),
            json!([1, 2])
        );
    }

    #[test]
    fn test_definitions_are_sorted_and_replaced() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_fn(definition("b"), |_| async { Ok(Value::Null) })
            .register_fn(definition("a"), |_| async { Ok(Value::Null) });
        let mut replacement = definition("b");
        replacement.description = "Replaced.".to_string();
        registry.register_fn(replacement, |_| async { Ok(Value::Null) });

        let definitions = registry.definitions();
        assert_eq!(registry.len(), 2);
        assert_eq!(definitions[0].name, "a");
        assert_eq!(definitions[1].name, "b");
        assert_eq!(definitions[1].description, "Replaced.");
    }

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Args {
        /// How many.
        count: u32,
    }

    #[test]
    fn test_parameters_schema_strips_metadata() {
        let schema = parameters_schema::<Args>();

        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["count"]["description"], "How many.");
        assert_eq!(schema["required"], json!(["count"]));
    }
}
