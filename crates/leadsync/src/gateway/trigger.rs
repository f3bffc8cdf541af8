//! HTTP client for the scraping worker's trigger webhook.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{ScrapeTrigger, TriggerError, TriggerRequest};
use crate::config::TriggerConfig;
use crate::secrets::resolve_secret;

/// Reply body of the webhook. Validation failures come back as
/// `{"status": "error", "message": ...}` even on a 2xx response.
#[derive(Debug, Deserialize)]
struct WebhookReply {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Posts trigger requests to the worker with a bearer credential.
pub struct HttpScrapeTrigger {
    client: Client,
    url: String,
    token: SecretString,
}

impl HttpScrapeTrigger {
    pub fn new(
        url: &str,
        token: SecretString,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, TriggerError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TriggerError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }

    /// Builds the client from config, resolving the bearer token.
    pub fn from_config(config: &TriggerConfig) -> crate::Result<Self> {
        let token = resolve_secret(
            config.token.as_deref(),
            config.token_file.as_deref(),
            config.token_env_var.as_deref(),
        )?;
        Ok(Self::new(
            &config.url,
            token,
            config.connect_timeout(),
            config.request_timeout(),
        )?)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ScrapeTrigger for HttpScrapeTrigger {
    async fn trigger(&self, request: &TriggerRequest) -> Result<(), TriggerError> {
        log::info!("Triggering scraper for job {}", request.job_id);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.token.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| TriggerError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(TriggerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        if let Ok(reply) = serde_json::from_str::<WebhookReply>(&body) {
            if reply.status.eq_ignore_ascii_case("error") {
                return Err(TriggerError::Refused(
                    reply.message.unwrap_or_else(|| "no reason given".to_string()),
                ));
            }
        }

        log::debug!("Scraper accepted job {}", request.job_id);
        Ok(())
    }
}
