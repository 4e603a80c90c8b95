pub mod dispatch;
pub mod functions;
pub mod message;
pub mod order;
pub mod workflow;

pub use dispatch::handle_function_call_request;
pub use functions::{FunctionError, FunctionHandler, FunctionRegistry};
pub use message::{ConversationMessage, ConversationState, MessageType};
pub use workflow::{Workflow, WorkflowError};

/// The seed conversation used to start a session's first workflow invocation.
pub fn greeting_state() -> ConversationState {
    ConversationState::new(vec![
        ConversationMessage::human("Hello")
            .with_kwarg("metadata", serde_json::json!({ "audioStream": true })),
    ])
}
