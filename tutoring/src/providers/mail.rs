//! Mailers.

use super::{
    Email, Mailer,
    errors::{ProviderError, ProviderResult},
};
use async_trait::async_trait;

/// Writes outgoing email to the log instead of sending it
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> ProviderResult<()> {
        tracing::info!(to = %email.to, subject = %email.subject, "Email (log only)");
        Ok(())
    }
}

/// Posts each email as JSON to a relay endpoint
#[derive(Clone)]
pub struct WebhookMailer {
    http: reqwest::Client,
    url: String,
}

impl WebhookMailer {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, email: &Email) -> ProviderResult<()> {
        let response = self.http.post(&self.url).json(email).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}
