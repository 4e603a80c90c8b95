//! Client for a bidirectional voice-agent session.
//!
//! A single websocket carries raw audio in binary frames and JSON control
//! messages in text frames. This crate owns that connection:
//!
//! - `settings`: the configuration document sent once when a connection opens.
//! - `protocol`: inbound control messages and the function-call reply.
//! - `events`: the publish/subscribe surface consumers listen on.
//! - `connection`: the connection state machine and frame demultiplexer.

pub mod connection;
pub mod events;
pub mod protocol;
pub mod settings;

pub use connection::{AgentConnection, ConnectionError, ConnectionState, DEFAULT_AGENT_URL};
pub use events::{AgentEvent, EventBus};
pub use protocol::{ControlMessage, FunctionCallRequest, FunctionCallResponse};
pub use settings::{
    AgentSettings, AudioInput, AudioOutput, AudioSettings, FunctionDefinition, ModelSettings,
    SettingsConfiguration, ThinkProvider, ThinkSettings,
};
