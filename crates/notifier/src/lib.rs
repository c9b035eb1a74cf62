//! Outbound mail delivery.
//!
//! Campaign test sends go straight to project members through a [`Mailer`].
//! Production uses the Resend HTTP API; without an API key messages are only
//! logged.

pub mod render;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::json;

use mailcast_common::config::AppConfig;
use mailcast_common::error::AppError;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// Display name and address an email is sent from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub name: String,
    pub email: String,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub from: Sender,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Sends rendered emails.
pub trait Mailer: Clone + Send + Sync + 'static {
    fn send(&self, email: &OutgoingEmail) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Delivers through the Resend HTTP API.
#[derive(Debug, Clone)]
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl ResendMailer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: RESEND_ENDPOINT.to_string(),
        }
    }

    /// Point the mailer at a different API base, e.g. a local mock.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(email: &OutgoingEmail) -> serde_json::Value {
        json!({
            "from": email.from.to_string(),
            "to": email.to,
            "subject": email.subject,
            "html": email.html,
        })
    }
}

impl Mailer for ResendMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(email))
            .send()
            .await
            .map_err(|e| AppError::Mail(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Mail(format!("Resend returned {}: {}", status, detail)));
        }

        tracing::info!(
            recipients = email.to.len(),
            subject = %email.subject,
            "Email delivered via Resend"
        );
        Ok(())
    }
}

/// Logs messages instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), AppError> {
        tracing::info!(
            from = %email.from,
            recipients = email.to.len(),
            subject = %email.subject,
            "Email delivery disabled, message logged only"
        );
        Ok(())
    }
}

/// Mailer selected from configuration.
#[derive(Debug, Clone)]
pub enum DeliveryMailer {
    Resend(ResendMailer),
    Log(LogMailer),
}

impl DeliveryMailer {
    pub fn from_config(config: &AppConfig) -> Self {
        match &config.resend_api_key {
            Some(key) if !key.is_empty() => DeliveryMailer::Resend(ResendMailer::new(key.clone())),
            _ => {
                tracing::warn!("RESEND_API_KEY not set, test emails will only be logged");
                DeliveryMailer::Log(LogMailer)
            }
        }
    }
}

impl Mailer for DeliveryMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), AppError> {
        match self {
            DeliveryMailer::Resend(mailer) => mailer.send(email).await,
            DeliveryMailer::Log(mailer) => mailer.send(email).await,
        }
    }
}
