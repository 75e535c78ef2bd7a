use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::Display;

use crate::models::job::Job;

/// Status reported to the caller's callback URL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallbackStatus {
    Completed,
    Failed,
}

/// JSON body POSTed to the callback URL once a job is terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackPayload {
    pub request_id: String,
    pub status: CallbackStatus,
    pub image_url: Option<String>,
    pub image_hash: Option<String>,
    pub seed_used: Option<u64>,
    pub user_id: Option<String>,
    pub persona_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl CallbackPayload {
    /// Build the payload from a terminal job.
    pub fn from_job(job: &Job) -> Self {
        let status = if job.result.is_some() {
            CallbackStatus::Completed
        } else {
            CallbackStatus::Failed
        };
        Self {
            request_id: job.request_id.clone(),
            status,
            image_url: job.result.as_ref().map(|r| r.image_url.clone()),
            image_hash: job.result.as_ref().map(|r| r.image_hash.clone()),
            seed_used: job.result.as_ref().map(|r| r.seed_used),
            user_id: job.request.user_id.clone(),
            persona_id: job.request.persona_id.clone(),
            error: job.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

/// Bounded exponential backoff for callback delivery.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): base * 2^(attempt-1),
    /// capped at `max_backoff`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Delivers one callback attempt. Retry is the coordinator's job.
#[async_trait]
pub trait CallbackSender: Send + Sync {
    async fn send(&self, url: &str, payload: &CallbackPayload) -> Result<(), CallbackError>;
}

/// `reqwest`-backed sender with a per-attempt timeout.
pub struct HttpCallbackSender {
    http: Client,
}

impl HttpCallbackSender {
    pub fn new(attempt_timeout: Duration) -> Result<Self, CallbackError> {
        let http = Client::builder()
            .timeout(attempt_timeout)
            .build()
            .map_err(CallbackError::Http)?;
        Ok(Self { http })
    }
}

#[async_trait]
impl CallbackSender for HttpCallbackSender {
    async fn send(&self, url: &str, payload: &CallbackPayload) -> Result<(), CallbackError> {
        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(CallbackError::Http)?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(CallbackError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("callback request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("callback endpoint answered with status {0}")]
    Status(u16),
}
