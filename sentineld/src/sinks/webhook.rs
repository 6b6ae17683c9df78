//! Fire-and-forget HTTP POST sink. A failed delivery is logged and
//! counted by the caller (see [`super::AlertRouter::dispatch`]); it never
//! retries and never blocks the event loop waiting on the network.

use super::Sink;
use crate::alert::Alert;
use async_trait::async_trait;

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("webhook returned status {}", response.status());
        }
        Ok(())
    }
}
