//! The built-in ordering function exposed to the agent.

use crate::functions::{FunctionRegistry, parameters_schema};
use anyhow::{Context, Result};
use deepgram_agent::FunctionDefinition;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

pub const ADD_ITEM: &str = "add_item";

/// Arguments for `add_item`.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct AddItemArgs {
    /// The name of the item that the user would like to order.
    /// The valid values are only those on the menu.
    pub item: String,
}

pub fn add_item_definition() -> FunctionDefinition {
    FunctionDefinition {
        name: ADD_ITEM.to_string(),
        description: "Add an item to an order.".to_string(),
        parameters: parameters_schema::<AddItemArgs>(),
    }
}

pub async fn add_item(input: Value) -> Result<Value> {
    let args: AddItemArgs =
        serde_json::from_value(input).context("Invalid arguments for 'add_item'")?;
    info!(item = %args.item, "Adding item to order");
    Ok(Value::String(format!(
        "Item \"{}\" added to the order.",
        args.item
    )))
}

/// Registers every built-in ordering function.
pub fn register(registry: &mut FunctionRegistry) {
    registry.register_fn(add_item_definition(), add_item);
}
