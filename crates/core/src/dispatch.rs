//! Answers function calls requested over the wire.

use crate::functions::FunctionRegistry;
use deepgram_agent::{AgentConnection, FunctionCallRequest};
use tracing::{error, info};

/// Runs the requested function and sends the correlated `FunctionCallResponse`.
///
/// Failures are logged and swallowed so the session carries on; nothing is
/// sent back for a request that could not be answered. Returns whether a
/// response went out.
pub async fn handle_function_call_request(
    connection: &AgentConnection,
    registry: &FunctionRegistry,
    request: &FunctionCallRequest,
) -> bool {
    let function_name = request.function_name().unwrap_or_default();
    let Some(function_call_id) = request.function_call_id() else {
        error!(
            %function_name,
            request = %request.as_value(),
            "Function call request has no function_call_id, cannot answer it"
        );
        return false;
    };

    match registry.invoke(function_name, request.input().clone()).await {
        Ok(output) => {
            info!(%function_name, %function_call_id, "Returning function result to agent");
            connection
                .send_function_response(function_call_id, output)
                .await
        }
        Err(e) => {
            error!(%function_name, %function_call_id, error = %e, "Function call failed");
            false
        }
    }
}
