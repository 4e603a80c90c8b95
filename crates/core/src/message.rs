//! Conversation messages and the workflow state that carries them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "ai")]
    Ai,
    FunctionCallRequest,
    FunctionCallResponse,
}

/// One entry in the conversation.
///
/// Deserialization normalizes both accepted shapes into this one: the flat
/// `{type, content, additional_kwargs}` form and the serialized
/// `{type, kwargs: {content, additional_kwargs}}` form. Flat fields win, and
/// empty content counts as absent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "WireMessage")]
pub struct ConversationMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub additional_kwargs: Map<String, Value>,
    /// Set on `FunctionCallResponse` messages only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ConversationMessage {
    pub fn new(kind: MessageType, content: Option<String>) -> Self {
        Self {
            kind,
            content,
            additional_kwargs: Map::new(),
            output: None,
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageType::Human, Some(content.into()))
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageType::Ai, Some(content.into()))
    }

    /// A request for a local function, named in `additional_kwargs`.
    pub fn function_call_request(function_name: impl Into<String>, input: Value) -> Self {
        let mut message = Self::new(MessageType::FunctionCallRequest, None);
        message
            .additional_kwargs
            .insert("function_name".to_string(), Value::String(function_name.into()));
        message.additional_kwargs.insert("input".to_string(), input);
        message
    }

    pub fn function_call_response(output: Value) -> Self {
        let mut message = Self::new(MessageType::FunctionCallResponse, None);
        message.output = Some(output);
        message
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_kwargs.insert(key.into(), value);
        self
    }
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: MessageType,
    content: Option<String>,
    additional_kwargs: Option<Map<String, Value>>,
    kwargs: Option<NestedFields>,
    output: Option<Value>,
}

#[derive(Deserialize, Default)]
struct NestedFields {
    content: Option<String>,
    additional_kwargs: Option<Map<String, Value>>,
}

impl From<WireMessage> for ConversationMessage {
    fn from(wire: WireMessage) -> Self {
        let nested = wire.kwargs.unwrap_or_default();
        let non_empty = |c: &String| !c.is_empty();
        Self {
            kind: wire.kind,
            content: wire
                .content
                .filter(non_empty)
                .or_else(|| nested.content.filter(non_empty)),
            additional_kwargs: wire
                .additional_kwargs
                .or(nested.additional_kwargs)
                .unwrap_or_default(),
            output: wire.output,
        }
    }
}

/// The append-only message sequence threaded through the workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ConversationState {
    pub messages: Vec<ConversationMessage>,
}

impl ConversationState {
    pub fn new(messages: Vec<ConversationMessage>) -> Self {
        Self { messages }
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the sequence extended by one entry.
    pub fn appended(mut self, message: ConversationMessage) -> Self {
        self.messages.push(message);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_shape() {
        let message: ConversationMessage = serde_json::from_value(json!({
            "type": "human",
            "content": "Hello",
            "additional_kwargs": { "metadata": { "audioStream": true } }
        }))
        .unwrap();

        assert_eq!(message.kind, MessageType::Human);
        assert_eq!(message.content.as_deref(), Some("Hello"));
        assert_eq!(message.additional_kwargs["metadata"]["audioStream"], true);
    }

    #[test]
    fn test_nested_shape_is_normalized() {
        let message: ConversationMessage = serde_json::from_value(json!({
            "type": "FunctionCallRequest",
            "kwargs": {
                "content": "please add fries",
                "additional_kwargs": { "function_name": "add_item", "input": { "item": "Fries" } }
            }
        }))
        .unwrap();

        assert_eq!(message.kind, MessageType::FunctionCallRequest);
        assert_eq!(message.content.as_deref(), Some("please add fries"));
        assert_eq!(message.additional_kwargs["function_name"], "add_item");
    }

    #[test]
    fn test_flat_fields_take_precedence_and_empty_content_falls_back() {
        let message: ConversationMessage = serde_json::from_value(json!({
            "type": "ai",
            "content": "",
            "additional_kwargs": { "source": "flat" },
            "kwargs": { "content": "nested", "additional_kwargs": { "source": "nested" } }
        }))
        .unwrap();

        assert_eq!(message.content.as_deref(), Some("nested"));
        assert_eq!(message.additional_kwargs["source"], "flat");
    }

    #[test]
    fn test_missing_content_stays_absent() {
        let message: ConversationMessage =
            serde_json::from_value(json!({ "type": "human" })).unwrap();
        assert_eq!(message.content, None);
        assert!(message.additional_kwargs.is_empty());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_value::<ConversationMessage>(json!({ "type": "system" })).is_err());
    }

    #[test]
    fn test_function_call_response_serialization() {
        let value =
            serde_json::to_value(ConversationMessage::function_call_response(json!("done"))).unwrap();
        assert_eq!(
            value,
            json!({ "type": "FunctionCallResponse", "additional_kwargs": {}, "output": "done" })
        );
    }

    #[test]
    fn test_function_call_request_builder() {
        let message = ConversationMessage::function_call_request("add_item", json!({ "item": "Fries" }));
        assert_eq!(message.kind, MessageType::FunctionCallRequest);
        assert_eq!(message.additional_kwargs["function_name"], "add_item");
        assert_eq!(message.additional_kwargs["input"]["item"], "Fries");
    }

    #[test]
    fn test_state_appended_extends_by_one() {
        let state = ConversationState::new(vec![ConversationMessage::human("Hi")]);
        let next = state.clone().appended(ConversationMessage::ai("Hi"));

        assert_eq!(next.len(), state.len() + 1);
        assert_eq!(next.messages[..1], state.messages[..]);
    }
}
