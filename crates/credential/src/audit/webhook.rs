use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

use super::{AuditEntry, AuditError, AuditSink};

/// Posts adaptive cards to a chat webhook
///
/// Only notable events (escalations, manual actions, expiry warnings,
/// terminal outcomes, failed restores) are posted unless
/// [`with_transitions`](Self::with_transitions) is set.
#[derive(Debug, Clone)]
pub struct WebhookAuditSink {
    client: Client,
    url: Url,
    include_transitions: bool,
}

impl WebhookAuditSink {
    /// Sink posting to `url`
    pub fn new(url: Url) -> Result<Self, AuditError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuditError::Delivery(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            include_transitions: false,
        })
    }

    /// Also post routine events
    pub fn with_transitions(mut self) -> Self {
        self.include_transitions = true;
        self
    }

    fn card(entry: &AuditEntry) -> Value {
        json!({
            "type": "message",
            "attachments": [{
                "contentType": "application/vnd.microsoft.card.adaptive",
                "content": {
                    "type": "AdaptiveCard",
                    "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                    "version": "1.2",
                    "body": [
                        {
                            "type": "TextBlock",
                            "text": format!("Key rotation: {}", entry.account),
                            "weight": "bolder",
                            "size": "medium",
                        },
                        {
                            "type": "TextBlock",
                            "text": entry.event.description(),
                            "wrap": true,
                        },
                        {
                            "type": "FactSet",
                            "facts": [
                                { "title": "Flow", "value": entry.flow.to_string() },
                                { "title": "Attempt", "value": entry.attempt_id.to_string() },
                                { "title": "At", "value": entry.at.to_rfc3339() },
                            ],
                        },
                    ],
                },
            }],
        })
    }
}

#[async_trait]
impl AuditSink for WebhookAuditSink {
    async fn send(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        if !self.include_transitions && !entry.event.is_notable() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.url.clone())
            .json(&Self::card(entry))
            .send()
            .await
            .map_err(|e| AuditError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::Delivery(format!("webhook returned {status}")));
        }
        Ok(())
    }
}
