use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::generation::{GenerationRequest, RenderResult};
use crate::models::policy::{PolicyOutcome, RejectionReason};
use crate::services::render::BackendError;
use crate::services::storage::content_hash;

/// Lifecycle event an audit entry records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditEvent {
    Rejected,
    Admitted,
    Completed,
    Failed,
    CallbackDelivered,
    CallbackExhausted,
}

/// One append-only audit record. Never edited after it is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub request_id: String,
    pub user_id: Option<String>,
    pub persona_id: Option<String>,
    pub outcome: PolicyOutcome,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<RejectionReason>,
    /// Short hash of the raw prompt; the prompt itself is not retained.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seed_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub backend_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub callback_attempts: Option<u32>,
}

impl AuditEntry {
    fn base(event: AuditEvent, request: &GenerationRequest, outcome: PolicyOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            persona_id: request.persona_id.clone(),
            outcome,
            reason: None,
            prompt_hash: None,
            success: None,
            image_hash: None,
            seed_used: None,
            backend_latency_ms: None,
            error: None,
            callback_attempts: None,
        }
    }

    pub fn rejected(request: &GenerationRequest, reason: RejectionReason) -> Self {
        Self {
            reason: Some(reason),
            prompt_hash: Some(content_hash(request.prompt.as_bytes())),
            ..Self::base(AuditEvent::Rejected, request, PolicyOutcome::Rejected)
        }
    }

    pub fn admitted(request: &GenerationRequest) -> Self {
        Self {
            prompt_hash: Some(content_hash(request.prompt.as_bytes())),
            seed_used: Some(request.params.seed),
            ..Self::base(AuditEvent::Admitted, request, PolicyOutcome::Allowed)
        }
    }

    pub fn completed(request: &GenerationRequest, result: &RenderResult) -> Self {
        Self {
            success: Some(true),
            image_hash: Some(result.image_hash.clone()),
            seed_used: Some(result.seed_used),
            backend_latency_ms: Some(result.latency_ms),
            ..Self::base(AuditEvent::Completed, request, PolicyOutcome::Allowed)
        }
    }

    pub fn failed(request: &GenerationRequest, error: &BackendError, latency_ms: u64) -> Self {
        Self {
            success: Some(false),
            backend_latency_ms: Some(latency_ms),
            error: Some(error.to_string()),
            ..Self::base(AuditEvent::Failed, request, PolicyOutcome::Allowed)
        }
    }

    pub fn callback_outcome(
        request: &GenerationRequest,
        delivered: bool,
        attempts: u32,
        last_error: Option<String>,
    ) -> Self {
        let event = if delivered {
            AuditEvent::CallbackDelivered
        } else {
            AuditEvent::CallbackExhausted
        };
        Self {
            success: Some(delivered),
            callback_attempts: Some(attempts),
            error: last_error,
            ..Self::base(event, request, PolicyOutcome::Allowed)
        }
    }
}
