//! Voicebridge Service Library Crate
//!
//! Everything the `voicebridge` binary runs: configuration loading, the local
//! audio endpoints, and the orchestrator that ties a voice-agent session to
//! the ordering functions. The binary is a thin wrapper around this library.

pub mod audio;
pub mod config;
#[cfg(feature = "device-audio")]
pub mod device;
pub mod orchestrator;
