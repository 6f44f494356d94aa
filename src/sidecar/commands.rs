//! Typed wrappers over the sidecar command surface.
//!
//! Commands that change server-side state also announce the change on the
//! event hub so views and analytics can react.

use super::error::RpcError;
use super::rpc_client::RpcClient;
use crate::event_hub::{ConnectionStatus, EventHub, HubEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Arguments of the `connect` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectRequest {
    /// `"remote"` for a REST server, `"local"` for a locally deployed one.
    pub connection_type: String,
    pub url: String,
    pub options: Map<String, Value>,
    pub verify_ssl: bool,
}

impl ConnectRequest {
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            connection_type: "remote".to_string(),
            url: url.into(),
            options: Map::new(),
            verify_ssl: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

/// An entity identified by id and name (stack, project).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct StoreInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub deployment_type: Option<String>,
    #[serde(default)]
    pub auth_scheme: Option<String>,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub dashboard_url: Option<String>,
    #[serde(default)]
    pub active_project_id: Option<String>,
    #[serde(default)]
    pub active_project_name: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(rename = "type", default)]
    pub store_type: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(default)]
    pub store_info: StoreInfo,
    #[serde(default)]
    pub store_config: StoreConfig,
}

impl ServerInfo {
    pub fn connection_status(&self) -> ConnectionStatus {
        let details = crate::event_hub::ServerDetails {
            url: self.store_config.url.clone(),
            store_type: self.store_config.store_type.clone(),
        };
        if details.is_remote_connection() {
            ConnectionStatus::connected(details.url)
        } else {
            ConnectionStatus::disconnected()
        }
    }
}

pub struct SidecarCommands {
    rpc: Arc<RpcClient>,
    hub: Arc<EventHub>,
}

impl SidecarCommands {
    pub fn new(rpc: Arc<RpcClient>, hub: Arc<EventHub>) -> Self {
        Self { rpc, hub }
    }

    fn announce(&self, event: HubEvent) {
        let name = event.name().to_string();
        if let Err(e) = self.hub.emit(event) {
            warn!(error = %e, event = %name, "subscriber failed");
        }
    }

    pub async fn connect(&self, request: &ConnectRequest) -> Result<ConnectResponse, RpcError> {
        let response: ConnectResponse = self
            .rpc
            .call(
                "connect",
                vec![
                    json!(request.connection_type),
                    json!(request.url),
                    Value::Object(request.options.clone()),
                    json!(request.verify_ssl),
                ],
            )
            .await?;
        info!(url = %request.url, "connected to server");
        self.announce(HubEvent::ConnectionStatusUpdated(ConnectionStatus::connected(
            request.url.clone(),
        )));
        Ok(response)
    }

    /// Announces the intent first so the disconnect that follows is
    /// attributed to the user.
    pub async fn disconnect(&self) -> Result<MessageResponse, RpcError> {
        self.announce(HubEvent::DisconnectRequested);
        let response: MessageResponse = self.rpc.call("disconnect", vec![]).await?;
        info!("disconnected from server");
        self.announce(HubEvent::ConnectionStatusUpdated(
            ConnectionStatus::disconnected(),
        ));
        Ok(response)
    }

    pub async fn server_info(&self) -> Result<ServerInfo, RpcError> {
        self.rpc.call("serverInfo", vec![]).await
    }

    pub async fn get_active_stack(&self) -> Result<EntityRef, RpcError> {
        self.rpc.call("getActiveStack", vec![]).await
    }

    pub async fn switch_active_stack(
        &self,
        stack_name_or_id: &str,
    ) -> Result<EntityRef, RpcError> {
        let stack: EntityRef = self
            .rpc
            .call("switchActiveStack", vec![json!(stack_name_or_id)])
            .await?;
        self.announce(HubEvent::ActiveStackChanged(stack.id.clone()));
        Ok(stack)
    }

    pub async fn rename_stack(
        &self,
        stack_name_or_id: &str,
        new_name: &str,
    ) -> Result<MessageResponse, RpcError> {
        self.rpc
            .call("renameStack", vec![json!(stack_name_or_id), json!(new_name)])
            .await
    }

    pub async fn copy_stack(
        &self,
        source: &str,
        target_name: &str,
    ) -> Result<MessageResponse, RpcError> {
        self.rpc
            .call("copyStack", vec![json!(source), json!(target_name)])
            .await
    }

    pub async fn get_active_project(&self) -> Result<EntityRef, RpcError> {
        self.rpc.call("getActiveProject", vec![]).await
    }

    pub async fn switch_active_project(
        &self,
        project_name_or_id: &str,
    ) -> Result<EntityRef, RpcError> {
        let project: EntityRef = self
            .rpc
            .call("switchActiveProject", vec![json!(project_name_or_id)])
            .await?;
        self.announce(HubEvent::ActiveProjectChanged(project.name.clone()));
        Ok(project)
    }

    pub async fn delete_pipeline_run(&self, run_id: &str) -> Result<MessageResponse, RpcError> {
        self.rpc
            .call("deletePipelineRun", vec![json!(run_id)])
            .await
    }

    /// Raw installation report; its shape varies between sidecar versions.
    pub async fn check_installation(&self) -> Result<Value, RpcError> {
        self.rpc.send_request("checkInstallation", vec![]).await
    }
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
