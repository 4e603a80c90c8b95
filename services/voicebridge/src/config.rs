use deepgram_agent::{
    AgentSettings, AudioSettings, DEFAULT_AGENT_URL, FunctionDefinition, ModelSettings,
    SettingsConfiguration, ThinkProvider, ThinkSettings,
};
use secrecy::SecretString;
use tracing::Level;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant you can add any items to an order when the user asks to 'add item' followed by the item name.";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
///
/// The API key is only ever exposed when building the connection's
/// authorization header.
#[derive(Debug)]
pub struct Config {
    pub agent_url: String,
    pub api_key: SecretString,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub listen_model: String,
    pub speak_model: String,
    pub think_provider: String,
    pub think_model: String,
    pub instructions: String,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_key = std::env::var("DEEPGRAM_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingVar("DEEPGRAM_API_KEY".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            agent_url: var_or("AGENT_URL", DEFAULT_AGENT_URL),
            api_key: SecretString::from(api_key),
            input_sample_rate: sample_rate_var("INPUT_SAMPLE_RATE", 16000)?,
            output_sample_rate: sample_rate_var("OUTPUT_SAMPLE_RATE", 48000)?,
            listen_model: var_or("LISTEN_MODEL", "nova-2"),
            speak_model: var_or("SPEAK_MODEL", "aura-asteria-en"),
            think_provider: var_or("THINK_PROVIDER", "open_ai"),
            think_model: var_or("THINK_MODEL", "gpt-4o"),
            instructions: var_or("AGENT_INSTRUCTIONS", DEFAULT_INSTRUCTIONS),
            log_level,
        })
    }

    /// The session configuration sent when the connection opens, advertising
    /// the given functions.
    pub fn settings(&self, functions: Vec<FunctionDefinition>) -> SettingsConfiguration {
        SettingsConfiguration {
            audio: AudioSettings::linear16(self.input_sample_rate, self.output_sample_rate),
            agent: AgentSettings {
                listen: ModelSettings {
                    model: self.listen_model.clone(),
                },
                speak: ModelSettings {
                    model: self.speak_model.clone(),
                },
                think: ThinkSettings {
                    provider: ThinkProvider {
                        kind: self.think_provider.clone(),
                    },
                    model: self.think_model.clone(),
                    instructions: self.instructions.clone(),
                    functions,
                },
            },
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn sample_rate_var(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u32>() {
            Ok(rate) if rate > 0 => Ok(rate),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a valid sample rate", raw),
            )),
        },
        Err(_) => Ok(default),
    }
}
