//! Outbound delivery of analytics batches.

use super::event::AnalyticsEvent;
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://analytics.zenml.io/batch";
pub const SOURCE_CONTEXT_HEADER: &str = "Source-Context";
pub const SOURCE_CONTEXT: &str = "vscode";
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures surfaced by the analytics layer. None of them ever escape as a
/// panic; callers may ignore them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsError {
    InvalidEndpoint { endpoint: String },
    Serialize { message: String },
    Send { message: String },
}

impl std::fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyticsError::InvalidEndpoint { endpoint } => {
                write!(f, "invalid analytics endpoint '{}'", endpoint)
            }
            AnalyticsError::Serialize { message } => {
                write!(f, "failed to encode analytics batch: {}", message)
            }
            AnalyticsError::Send { message } => {
                write!(f, "failed to send analytics batch: {}", message)
            }
        }
    }
}

impl std::error::Error for AnalyticsError {}

/// Delivers one batch. Success means the collector accepted the request;
/// the response body is not interpreted.
#[async_trait]
pub trait AnalyticsSender: Send + Sync {
    async fn send(&self, batch: &[AnalyticsEvent]) -> Result<(), AnalyticsError>;
}

/// HTTP sender posting the batch as a JSON array.
pub struct HttpSender {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpSender {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AnalyticsError> {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(AnalyticsError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
            });
        }
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Ok(Self {
            endpoint: endpoint.to_string(),
            agent,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AnalyticsSender for HttpSender {
    async fn send(&self, batch: &[AnalyticsEvent]) -> Result<(), AnalyticsError> {
        let body = serde_json::to_string(batch).map_err(|e| AnalyticsError::Serialize {
            message: e.to_string(),
        })?;
        let agent = self.agent.clone();
        let endpoint = self.endpoint.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            agent
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .header(SOURCE_CONTEXT_HEADER, SOURCE_CONTEXT)
                .send(&body)
                .map(|_| ())
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AnalyticsError::Send {
                message: e.to_string(),
            }),
            Err(e) => Err(AnalyticsError::Send {
                message: format!("send task failed: {}", e),
            }),
        }
    }
}
