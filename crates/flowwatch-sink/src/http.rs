//! HTTP Sink

use crate::{EventSink, SinkError};
use async_trait::async_trait;
use flowwatch_core::FlowEvent;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// POSTs each event as a JSON body
pub struct HttpSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSink {
    /// Create sink posting to `endpoint` with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("flowwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    /// Target URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn deliver(&self, event: &FlowEvent) -> Result<(), SinkError> {
        let body = serde_json::to_vec(event)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
