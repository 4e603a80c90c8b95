//! Session Orchestrator
//!
//! Wires the agent connection, the function registry, the conversation
//! workflow and the local audio endpoints together for one process lifetime.

use crate::{
    audio::{self, AudioSink, InputSource, OutputTarget},
    config::Config,
};
use anyhow::Context;
use deepgram_agent::{AgentConnection, AgentEvent};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info};
use voicebridge_core::{
    FunctionRegistry, Workflow, greeting_state, handle_function_call_request, order,
};

/// Local audio endpoints chosen at startup.
#[derive(Debug, Clone)]
pub struct AudioOptions {
    pub input: InputSource,
    pub output: OutputTarget,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            input: InputSource::None,
            output: OutputTarget::Discard,
        }
    }
}

/// The registry of functions the agent may call.
pub fn build_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    order::register(&mut registry);
    registry
}

/// Runs a session until the connection closes or `shutdown` resolves.
pub async fn run(
    config: Config,
    audio: AudioOptions,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let registry = Arc::new(build_registry());
    let settings = config.settings(registry.definitions());
    let connection = Arc::new(AgentConnection::new(
        config.agent_url.clone(),
        config.api_key,
        settings,
    ));
    let sink = audio::open_sink(&audio.output, config.output_sample_rate)?;

    // Subscribe before connecting so nothing published on open is missed.
    let events = connection.subscribe();
    let event_loop = tokio::spawn(handle_events(
        events,
        connection.clone(),
        registry.clone(),
        sink,
    ));

    connection
        .connect()
        .await
        .context("Failed to connect to the agent service")?;

    if let Some(mut chunks) = audio::open_source(&audio.input, config.input_sample_rate).await? {
        let connection = connection.clone();
        tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                connection.send_audio(&chunk).await;
            }
            debug!("Audio input finished");
        });
    }

    let workflow = Workflow::new(connection.clone(), registry.clone());
    match workflow.invoke(greeting_state()).await {
        Ok(final_state) => match serde_json::to_string(&final_state) {
            Ok(final_state) => info!(%final_state, "Workflow execution completed"),
            Err(e) => error!(error = %e, "Failed to serialize final workflow state"),
        },
        Err(e) => error!(error = %e, "Error executing workflow"),
    }

    tokio::select! {
        _ = shutdown => {
            info!("Closing agent session");
            connection.close().await;
        }
        _ = event_loop => info!("Agent session ended"),
    }
    Ok(())
}

/// Reacts to every session event until the connection closes.
pub async fn handle_events(
    mut events: UnboundedReceiver<AgentEvent>,
    connection: Arc<AgentConnection>,
    registry: Arc<FunctionRegistry>,
    sink: Arc<dyn AudioSink>,
) {
    while let Some(event) = events.recv().await {
        debug!(event = event.name(), "Agent event");
        match event {
            AgentEvent::AudioResponse(chunk) => {
                if let Err(e) = sink.play(&chunk) {
                    error!(error = %e, "Error playing audio");
                }
            }
            AgentEvent::StopAudio => {
                info!("User started speaking, stopping playback");
                sink.stop();
            }
            AgentEvent::TextResponse(response) => info!(%response, "Agent response"),
            AgentEvent::FunctionCallRequest(request) => {
                let connection = connection.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    handle_function_call_request(&connection, &registry, &request).await;
                });
            }
            AgentEvent::Error(message) => error!(%message, "Agent error"),
            AgentEvent::Closed => {
                info!("Agent connection closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use std::{sync::Mutex, time::Duration};
    use tokio::{net::TcpListener, sync::mpsc, time::timeout};
    use tokio_tungstenite::{accept_async, tungstenite::Message};
    use tracing::Level;

    #[derive(Default)]
    struct RecordingSink {
        played: Mutex<Vec<u8>>,
        stops: Mutex<usize>,
    }

    impl AudioSink for RecordingSink {
        fn play(&self, chunk: &[u8]) -> anyhow::Result<()> {
            self.played.lock().unwrap().extend_from_slice(chunk);
            Ok(())
        }

        fn stop(&self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    struct FailingSink;

    impl AudioSink for FailingSink {
        fn play(&self, _chunk: &[u8]) -> anyhow::Result<()> {
            anyhow::bail!("device unplugged")
        }

        fn stop(&self) {}
    }

    fn config(agent_url: String) -> Config {
        Config {
            agent_url,
            api_key: SecretString::from("test-key".to_string()),
            input_sample_rate: 16000,
            output_sample_rate: 48000,
            listen_model: "nova-2".to_string(),
            speak_model: "aura-asteria-en".to_string(),
            think_provider: "open_ai".to_string(),
            think_model: "gpt-4o".to_string(),
            instructions: crate::config::DEFAULT_INSTRUCTIONS.to_string(),
            log_level: Level::INFO,
        }
    }

    fn idle_connection() -> Arc<AgentConnection> {
        let config = config("ws://127.0.0.1:1".to_string());
        let settings = config.settings(vec![]);
        Arc::new(AgentConnection::new(config.agent_url, config.api_key, settings))
    }

    #[test]
    fn test_registry_offers_add_item() {
        let registry = build_registry();
        assert!(registry.contains("add_item"));
        assert_eq!(registry.definitions()[0].name, "add_item");
    }

    #[tokio::test]
    async fn test_events_drive_the_sink_until_closed() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(AgentEvent::AudioResponse(vec![1, 2].into())).unwrap();
        tx.send(AgentEvent::StopAudio).unwrap();
        tx.send(AgentEvent::TextResponse(json!({ "type": "Welcome" }))).unwrap();
        tx.send(AgentEvent::Error("bad frame".to_string())).unwrap();
        tx.send(AgentEvent::AudioResponse(vec![3].into())).unwrap();
        tx.send(AgentEvent::Closed).unwrap();
        // Not consumed: the loop stops at Closed.
        tx.send(AgentEvent::AudioResponse(vec![9].into())).unwrap();

        timeout(
            Duration::from_secs(5),
            handle_events(rx, idle_connection(), Arc::new(build_registry()), sink.clone()),
        )
        .await
        .expect("event loop should end on Closed");

        assert_eq!(*sink.played.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*sink.stops.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_playback_errors_do_not_end_the_loop() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(AgentEvent::AudioResponse(vec![1].into())).unwrap();
        tx.send(AgentEvent::AudioResponse(vec![2].into())).unwrap();
        tx.send(AgentEvent::Closed).unwrap();

        timeout(
            Duration::from_secs(5),
            handle_events(rx, idle_connection(), Arc::new(build_registry()), Arc::new(FailingSink)),
        )
        .await
        .expect("event loop should end on Closed");
    }

    #[tokio::test]
    async fn test_run_answers_function_calls_until_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();

            let settings: Value = match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected settings, got {other:?}"),
            };

            let request = json!({
                "type": "FunctionCallRequest",
                "function_call_id": "call-1",
                "function_name": "add_item",
                "input": { "item": "Milkshake" }
            });
            ws.send(Message::Text(request.to_string().into())).await.unwrap();

            let response = loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Text(text) => break serde_json::from_str::<Value>(&text).unwrap(),
                    _ => continue,
                }
            };
            ws.close(None).await.unwrap();
            (settings, response)
        });

        timeout(
            Duration::from_secs(10),
            run(config(url), AudioOptions::default(), std::future::pending()),
        )
        .await
        .expect("session should end when the server closes")
        .unwrap();

        let (settings, response) = server.await.unwrap();
        assert_eq!(settings["type"], "SettingsConfiguration");
        assert_eq!(settings["agent"]["think"]["functions"][0]["name"], "add_item");
        assert_eq!(
            response,
            json!({
                "type": "FunctionCallResponse",
                "function_call_id": "call-1",
                "output": "Item \"Milkshake\" added to the order."
            })
        );
    }

    #[tokio::test]
    async fn test_run_fails_when_agent_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let result = run(config(url), AudioOptions::default(), std::future::pending()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_closes_session_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            // Drain until the client closes.
            while let Some(Ok(frame)) = ws.next().await {
                if frame.is_close() {
                    break;
                }
            }
        });

        timeout(
            Duration::from_secs(10),
            run(
                config(url),
                AudioOptions::default(),
                tokio::time::sleep(Duration::from_millis(200)),
            ),
        )
        .await
        .expect("shutdown should end the session")
        .unwrap();

        timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    }
}
