//! Sidecar command surface and notification vocabulary.
//!
//! Commands travel as `workspace/executeCommand` with
//! `command = "zenml-python.<method>"` and positional `arguments`. Results
//! are either a method-specific value, an `{error}` object, or the
//! `{clientVersion, serverVersion}` mismatch shape.

use super::error::RpcError;
use crate::event_hub::{HubEvent, ServerDetails};
use serde_json::{json, Value};

/// Prefix the sidecar registers its commands under.
pub const COMMAND_PREFIX: &str = "zenml-python";

/// JSON-RPC method every command is wrapped in.
pub const EXECUTE_COMMAND: &str = "workspace/executeCommand";

/// Commands the sidecar is known to register.
pub const KNOWN_METHODS: &[&str] = &[
    "connect",
    "disconnect",
    "serverInfo",
    "getGlobalConfig",
    "getGlobalConfigFilePath",
    "checkInstallation",
    "fetchStacks",
    "getActiveStack",
    "switchActiveStack",
    "renameStack",
    "copyStack",
    "listComponents",
    "getPipelineRuns",
    "deletePipelineRun",
    "listModels",
    "listProjects",
    "getActiveProject",
    "switchActiveProject",
    "listDeployments",
];

/// Notification methods sent by the sidecar.
pub mod notifications {
    pub const READY: &str = "zenml/ready";
    pub const SERVER_CHANGED: &str = "zenml/serverChanged";
    pub const STACK_CHANGED: &str = "zenml/stackChanged";
    pub const PROJECT_CHANGED: &str = "zenml/projectChanged";
    pub const REQUIREMENTS_NOT_MET: &str = "zenml/requirementsNotMet";
    pub const CONFIG_UPDATED: &str = "zenml/configUpdated";
    pub const VERSION: &str = "zenml/version";
    pub const LOG_MESSAGE: &str = "window/logMessage";
    pub const SHOW_MESSAGE: &str = "window/showMessage";
}

pub fn is_known_method(method: &str) -> bool {
    KNOWN_METHODS.contains(&method)
}

/// Fully qualified command id for `method`.
pub fn command_name(method: &str) -> String {
    format!("{}.{}", COMMAND_PREFIX, method)
}

/// `workspace/executeCommand` params for `method(args...)`.
pub fn execute_command_params(method: &str, args: Vec<Value>) -> Value {
    json!({
        "command": command_name(method),
        "arguments": args,
    })
}

/// Splits a raw command result into success or the caller-facing error.
pub fn classify_response(value: Value) -> Result<Value, RpcError> {
    if let Some(message) = error_message(&value) {
        return Err(RpcError::Server { message });
    }

    if let (Some(client), Some(server)) = (
        value.get("clientVersion").and_then(Value::as_str),
        value.get("serverVersion").and_then(Value::as_str),
    ) {
        return Err(RpcError::VersionMismatch {
            client_version: client.to_string(),
            server_version: server.to_string(),
        });
    }

    Ok(value)
}

/// Extracts the error text from `{error}` / `{error, message}` or a
/// single-element `[{error}]` list.
fn error_message(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            let error = map.get("error")?;
            let error_text = match error {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            match map.get("message").and_then(Value::as_str) {
                Some(detail) if !detail.is_empty() => Some(format!("{}: {}", error_text, detail)),
                _ => Some(error_text),
            }
        }
        Value::Array(items) if items.len() == 1 => error_message(&items[0]),
        _ => None,
    }
}

/// Translates a sidecar notification into the hub events it implies.
///
/// Returns an empty list for notifications that only feed the debug log.
pub fn hub_events_for_notification(method: &str, params: &Value) -> Vec<HubEvent> {
    match method {
        notifications::READY => {
            let ready = params
                .get("ready")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            vec![HubEvent::ServiceInitialized(ready)]
        }
        notifications::REQUIREMENTS_NOT_MET => vec![HubEvent::ServiceInitialized(false)],
        // A cleared stack arrives as an empty id (or null) and still
        // invalidates the stack views.
        notifications::STACK_CHANGED => match params {
            Value::Null => vec![HubEvent::ActiveStackChanged(String::new())],
            _ => entity_reference(params)
                .map(HubEvent::ActiveStackChanged)
                .into_iter()
                .collect(),
        },
        notifications::PROJECT_CHANGED => entity_reference(params)
            .filter(|name| !name.is_empty())
            .map(HubEvent::ActiveProjectChanged)
            .into_iter()
            .collect(),
        notifications::SERVER_CHANGED => {
            let details: ServerDetails = serde_json::from_value(params.clone()).unwrap_or_default();
            let status = if details.is_remote_connection() {
                crate::event_hub::ConnectionStatus::connected(details.url.clone())
            } else {
                crate::event_hub::ConnectionStatus::disconnected()
            };
            vec![
                HubEvent::ServerChanged(details),
                HubEvent::ConnectionStatusUpdated(status),
            ]
        }
        notifications::CONFIG_UPDATED | notifications::VERSION => vec![HubEvent::Custom {
            name: method.to_string(),
            payload: params.clone(),
        }],
        _ => Vec::new(),
    }
}

/// Stack/project change notifications carry either a bare string or an
/// object with `id` / `name`.
fn entity_reference(params: &Value) -> Option<String> {
    let raw = match params {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("name"))
            .and_then(Value::as_str),
        _ => None,
    }?;
    Some(raw.trim().to_string())
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
