use std::sync::Arc;
use std::time::Instant;

use crate::config::{GenerationBounds, GenerationDefaults};
use crate::error::AppError;
use crate::models::audit::AuditEntry;
use crate::models::generation::{GenerateRequest, GenerationRequest, RenderResult};
use crate::models::job::Job;
use crate::models::policy::{EffectivePrompts, PolicyDecision};
use crate::services::audit::AuditLog;
use crate::services::coordinator::JobCoordinator;
use crate::services::policy::PromptPolicyEngine;
use crate::services::render::RenderBackend;

/// Entry point for both generation paths: validate, filter, audit, then
/// either render inline or hand off to the coordinator.
pub struct GenerationService {
    policy: PromptPolicyEngine,
    backend: Arc<dyn RenderBackend>,
    coordinator: JobCoordinator,
    audit: Arc<AuditLog>,
    defaults: GenerationDefaults,
    bounds: GenerationBounds,
}

impl GenerationService {
    pub fn new(
        policy: PromptPolicyEngine,
        backend: Arc<dyn RenderBackend>,
        coordinator: JobCoordinator,
        audit: Arc<AuditLog>,
        defaults: GenerationDefaults,
        bounds: GenerationBounds,
    ) -> Self {
        Self {
            policy,
            backend,
            coordinator,
            audit,
            defaults,
            bounds,
        }
    }

    pub fn coordinator(&self) -> &JobCoordinator {
        &self.coordinator
    }

    pub fn safety_enabled(&self) -> bool {
        self.policy.config().enabled
    }

    /// Validate shape and bounds, then run the safety filter. Rejections are
    /// audited here; admissions are audited by whichever path runs the job.
    async fn admit(
        &self,
        raw: GenerateRequest,
    ) -> Result<(GenerationRequest, EffectivePrompts), AppError> {
        metrics::counter!("generation_requests_total").increment(1);
        let request = raw.into_generation(&self.defaults, &self.bounds)?;

        match self
            .policy
            .evaluate(&request.prompt, request.negative_prompt.as_deref())
        {
            PolicyDecision::Allowed(prompts) => Ok((request, prompts)),
            PolicyDecision::Rejected(reason) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    user_id = request.user_id.as_deref().unwrap_or("-"),
                    reason = %reason,
                    "Prompt rejected by safety filter"
                );
                metrics::counter!("generation_rejected_total", "reason" => reason.to_string())
                    .increment(1);
                self.audit.record(AuditEntry::rejected(&request, reason)).await;
                Err(AppError::PolicyRejection(reason))
            }
        }
    }

    /// Synchronous path: every failure is returned to the caller.
    pub async fn generate_sync(
        &self,
        raw: GenerateRequest,
    ) -> Result<(GenerationRequest, RenderResult), AppError> {
        let (request, prompts) = self.admit(raw).await?;
        self.audit.record(AuditEntry::admitted(&request)).await;

        tracing::info!(
            request_id = %request.request_id,
            persona_id = request.persona_id.as_deref().unwrap_or("-"),
            seed = request.params.seed,
            "Generating image synchronously"
        );

        let start = Instant::now();
        match self.backend.render(&prompts, &request.params).await {
            Ok(result) => {
                self.audit.record(AuditEntry::completed(&request, &result)).await;
                Ok((request, result))
            }
            Err(error) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                self.audit
                    .record(AuditEntry::failed(&request, &error, latency_ms))
                    .await;
                tracing::error!(request_id = %request.request_id, error = %error, "Generation failed");
                Err(error.into())
            }
        }
    }

    /// Async path: nothing past admission is raised to the caller.
    pub async fn generate_async(&self, raw: GenerateRequest) -> Result<String, AppError> {
        let (request, prompts) = self.admit(raw).await?;
        Ok(self.coordinator.submit(request, prompts)?)
    }

    pub fn job_status(&self, request_id: &str) -> Result<Job, AppError> {
        Ok(self.coordinator.get_status(request_id)?)
    }
}
