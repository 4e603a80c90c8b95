//! Conversation Workflow
//!
//! Threads a [`ConversationState`] through a small fixed graph:
//!
//! ```text
//! start -> agent -> localFunctions -> (localFunctions | end)
//! ```
//!
//! Each node takes ownership of the state and hands back the same sequence
//! with at most one entry appended. After `localFunctions`, the workflow loops
//! back only if the last message is still a `FunctionCallRequest`. The node
//! itself always answers such a request, so in practice an invocation ends
//! after a single pass.

use crate::{
    functions::{FunctionError, FunctionRegistry},
    message::{ConversationMessage, ConversationState, MessageType},
};
use deepgram_agent::AgentConnection;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Maximum node executions per invocation.
pub const RECURSION_LIMIT: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("No messages provided in state.")]
    EmptyInput,
    #[error("Message content is missing.")]
    MissingContent,
    #[error(transparent)]
    Function(#[from] FunctionError),
    #[error("Workflow did not finish within {0} steps")]
    RecursionLimit(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Agent,
    LocalFunctions,
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::Agent => "agent",
            Node::LocalFunctions => "localFunctions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    To(Node),
    End,
}

/// Conditional edge out of `localFunctions`.
pub fn should_continue(state: &ConversationState) -> Route {
    match state.last() {
        Some(last) if last.kind == MessageType::FunctionCallRequest => Route::To(Node::LocalFunctions),
        _ => Route::End,
    }
}

fn next_route(from: Node, state: &ConversationState) -> Route {
    match from {
        Node::Agent => Route::To(Node::LocalFunctions),
        Node::LocalFunctions => should_continue(state),
    }
}

/// The compiled graph. Both delegates are shared with the rest of the process:
/// the connection for emitting text, the registry for dispatching functions.
pub struct Workflow {
    connection: Arc<AgentConnection>,
    registry: Arc<FunctionRegistry>,
    step_limit: usize,
}

impl Workflow {
    pub fn new(connection: Arc<AgentConnection>, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            connection,
            registry,
            step_limit: RECURSION_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Runs one invocation from `start` to `end`. Errors from any node abort
    /// the invocation and are returned as-is.
    ///
    /// Invocations are not guarded against running concurrently.
    pub async fn invoke(&self, initial: ConversationState) -> Result<ConversationState, WorkflowError> {
        let mut state = initial;
        let mut route = Route::To(Node::Agent);
        let mut steps = 0;

        while let Route::To(node) = route {
            if steps == self.step_limit {
                return Err(WorkflowError::RecursionLimit(self.step_limit));
            }
            steps += 1;
            debug!(node = node.name(), step = steps, "Running workflow node");
            state = match node {
                Node::Agent => self.agent_node(state)?,
                Node::LocalFunctions => self.local_functions_node(state).await?,
            };
            route = next_route(node, &state);
        }

        debug!(steps, messages = state.len(), "Workflow reached end");
        Ok(state)
    }

    /// Echoes the last message's content as a text response and appends it
    /// as an `ai` message.
    pub fn agent_node(&self, state: ConversationState) -> Result<ConversationState, WorkflowError> {
        let last = state.last().ok_or(WorkflowError::EmptyInput)?;
        let content = last.content.clone().ok_or(WorkflowError::MissingContent)?;

        self.connection.emit_text_response(&content);
        Ok(state.appended(ConversationMessage::ai(content)))
    }

    /// Answers a trailing `FunctionCallRequest` through the registry; passes
    /// any other state through untouched.
    pub async fn local_functions_node(
        &self,
        state: ConversationState,
    ) -> Result<ConversationState, WorkflowError> {
        let last = state.last().ok_or(WorkflowError::EmptyInput)?;
        if last.kind != MessageType::FunctionCallRequest {
            return Ok(state);
        }

        let function_name = last
            .additional_kwargs
            .get("function_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let input = last
            .additional_kwargs
            .get("input")
            .cloned()
            .unwrap_or(Value::Null);
        info!(function_name = %function_name, "Routing to localFunctions");

        let output = self.registry.invoke(&function_name, input).await?;
        Ok(state.appended(ConversationMessage::function_call_response(output)))
    }
}
