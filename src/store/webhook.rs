use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::{config::WebhookConfig, domain::RecordId};

use super::{RemoteError, ScanTrigger};

#[derive(Debug, Serialize)]
struct TriggerPayload<'a> {
    record_id: &'a RecordId,
    domain: &'a str,
}

/// Tells the external scorer that a pending row is waiting. The verdict arrives later
/// through the change feed, so only the HTTP status of this call matters.
#[derive(Clone)]
pub struct WebhookTrigger {
    http: Client,
    config: WebhookConfig,
}

impl WebhookTrigger {
    pub fn new(http: Client, config: WebhookConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl ScanTrigger for WebhookTrigger {
    async fn notify(&self, record_id: &RecordId, domain: &str) -> Result<(), RemoteError> {
        self.http
            .post(&self.config.url)
            .timeout(self.config.timeout)
            .json(&TriggerPayload { record_id, domain })
            .send()
            .await?
            .error_for_status()?;
        tracing::info!(target: "webhook", record = %record_id, domain, "scorer notified");
        Ok(())
    }
}
