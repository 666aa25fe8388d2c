use serde::Serialize;

use super::clock::now_ms;
use crate::types::Result;

/// A coarse counter or timing sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub category: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub timestamp: u64,
}

impl TelemetryEvent {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
            label: None,
            value: None,
            timestamp: now_ms(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Fire-and-forget event sink. Implementations must never block or fail the caller.
pub trait TelemetrySink: Send + Sync {
    fn track(&self, event: TelemetryEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn track(&self, _event: TelemetryEvent) {}
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn track(&self, event: TelemetryEvent) {
        tracing::info!(
            category = %event.category,
            action = %event.action,
            label = event.label.as_deref().unwrap_or(""),
            value = event.value.unwrap_or_default(),
            "telemetry"
        );
    }
}

/// Posts events to an HTTP collector on a background task
pub struct HttpTelemetry {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTelemetry {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl TelemetrySink for HttpTelemetry {
    fn track(&self, event: TelemetryEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime, dropping telemetry event {}", event.action);
            return;
        };

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        runtime.spawn(async move {
            if let Err(e) = deliver(&client, &endpoint, &event).await {
                tracing::debug!("Telemetry delivery of '{}' failed: {}", event.action, e);
            }
        });
    }
}

async fn deliver(client: &reqwest::Client, endpoint: &str, event: &TelemetryEvent) -> Result<()> {
    client
        .post(endpoint)
        .header("Content-Type", "application/json")
        .json(event)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
