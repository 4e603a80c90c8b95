//! Control messages exchanged with the agent service as JSON text frames.
//!
//! Audio travels in binary frames with no envelope; everything else is a JSON
//! object discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

static NULL: Value = Value::Null;

/// An inbound control message, classified by its `type` discriminant.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// The agent wants a local function executed.
    FunctionCallRequest(FunctionCallRequest),
    /// The user began speaking; playback must be interrupted.
    UserStartedSpeaking,
    /// Any other `type`, passed through as parsed.
    Other(Value),
}

impl ControlMessage {
    /// Parses a text frame. Fails only when the frame is not valid JSON.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        Ok(match kind.as_deref() {
            Some("FunctionCallRequest") => Self::FunctionCallRequest(FunctionCallRequest::new(value)),
            Some("UserStartedSpeaking") => Self::UserStartedSpeaking,
            _ => Self::Other(value),
        })
    }
}

/// A request from the agent to run a named local function.
///
/// The message is kept exactly as received. Fields are read on demand, so a
/// request missing its correlation id still reaches subscribers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct FunctionCallRequest {
    raw: Value,
}

impl FunctionCallRequest {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn function_call_id(&self) -> Option<&str> {
        self.raw.get("function_call_id").and_then(Value::as_str)
    }

    pub fn function_name(&self) -> Option<&str> {
        self.raw.get("function_name").and_then(Value::as_str)
    }

    /// The arguments mapping, or `null` when absent.
    pub fn input(&self) -> &Value {
        self.raw.get("input").unwrap_or(&NULL)
    }

    pub fn as_value(&self) -> &Value {
        &self.raw
    }

    pub fn into_value(self) -> Value {
        self.raw
    }
}

/// The reply to a [`FunctionCallRequest`], correlated by `function_call_id`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename = "FunctionCallResponse")]
pub struct FunctionCallResponse {
    pub function_call_id: String,
    pub output: Value,
}
