//! The Session Configuration document.
//!
//! This is sent exactly once per physical connection, as the first outbound
//! frame, and declares the audio encodings plus the agent's capability set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level settings frame. Serializes with `"type": "SettingsConfiguration"`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename = "SettingsConfiguration")]
pub struct SettingsConfiguration {
    pub audio: AudioSettings,
    pub agent: AgentSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub input: AudioInput,
    pub output: AudioOutput,
}

impl AudioSettings {
    /// Raw 16-bit little-endian PCM in both directions, no output container.
    pub fn linear16(input_sample_rate: u32, output_sample_rate: u32) -> Self {
        Self {
            input: AudioInput {
                encoding: "linear16".to_string(),
                sample_rate: input_sample_rate,
            },
            output: AudioOutput {
                encoding: "linear16".to_string(),
                sample_rate: output_sample_rate,
                container: "none".to_string(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioInput {
    pub encoding: String,
    pub sample_rate: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioOutput {
    pub encoding: String,
    pub sample_rate: u32,
    pub container: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub listen: ModelSettings,
    pub speak: ModelSettings,
    pub think: ThinkSettings,
}

/// Model selection for the speech-to-text and text-to-speech stages.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ThinkSettings {
    pub provider: ThinkProvider,
    pub model: String,
    pub instructions: String,
    pub functions: Vec<FunctionDefinition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ThinkProvider {
    #[serde(rename = "type")]
    pub kind: String,
}

/// A callable capability advertised to the remote agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// A JSON Schema object describing the function's `input`.
    pub parameters: Value,
}
