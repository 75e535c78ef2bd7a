//! Async generation lifecycle.
//!
//! Jobs live in an in-process table keyed by request id and are lost on
//! restart. Each admitted job gets one background task that drives it from
//! `Queued` to a terminal state and then, if a callback URL was supplied,
//! through callback delivery. That task, or its supervisor if it panics, is
//! the only writer of its job.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::models::audit::AuditEntry;
use crate::models::generation::GenerationRequest;
use crate::models::job::{DeliveryState, Job, JobFailure, JobState};
use crate::models::policy::EffectivePrompts;
use crate::services::audit::AuditLog;
use crate::services::callback::{CallbackPayload, CallbackSender, RetryPolicy};
use crate::services::render::{BackendError, RenderBackend};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("request id '{0}' already has an active job")]
    Duplicate(String),

    #[error("job '{0}' not found")]
    NotFound(String),
}

/// Owns the job table and every background task that mutates it.
#[derive(Clone)]
pub struct JobCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: DashMap<String, Job>,
    backend: Arc<dyn RenderBackend>,
    callbacks: Arc<dyn CallbackSender>,
    audit: Arc<AuditLog>,
    retry: RetryPolicy,
    next_epoch: AtomicU64,
}

impl JobCoordinator {
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        callbacks: Arc<dyn CallbackSender>,
        audit: Arc<AuditLog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: DashMap::new(),
                backend,
                callbacks,
                audit,
                retry,
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    /// Admit a policy-approved request and start it in the background.
    ///
    /// Fails with `Duplicate` while an earlier job with the same request id
    /// is still queued, running, or delivering its callback. A settled job
    /// is replaced, not merged.
    ///
    /// Insert and spawn happen without a suspension point in between, so a
    /// caller that goes away after this returns cannot orphan the job.
    pub fn submit(
        &self,
        request: GenerationRequest,
        prompts: EffectivePrompts,
    ) -> Result<String, CoordinatorError> {
        let request_id = request.request_id.clone();
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let admitted = AuditEntry::admitted(&request);
        let job = Job::new(request, prompts, epoch);

        match self.inner.jobs.entry(request_id.clone()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_settled() {
                    tracing::warn!(request_id = %request_id, "Duplicate submission rejected");
                    return Err(CoordinatorError::Duplicate(request_id));
                }
                tracing::info!(request_id = %request_id, "Superseding settled job");
                existing.insert(job);
            }
            Entry::Vacant(slot) => {
                slot.insert(job);
            }
        }

        metrics::counter!("generation_jobs_submitted").increment(1);
        self.spawn_job(request_id.clone(), epoch, admitted);

        tracing::info!(request_id = %request_id, "Job queued");
        Ok(request_id)
    }

    /// Run the job on its own task, supervised so that a panic inside the
    /// backend or callback sender still leaves the job settled.
    fn spawn_job(&self, request_id: String, epoch: u64, admitted: AuditEntry) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let worker = tokio::spawn(Arc::clone(&inner).run_job(request_id.clone(), epoch, admitted));
            if let Err(err) = worker.await {
                if err.is_panic() {
                    tracing::error!(request_id = %request_id, "Job task panicked");
                    inner.recover_panicked(&request_id, epoch).await;
                }
            }
        });
    }

    /// Snapshot of a job. Never waits on in-flight work.
    pub fn get_status(&self, request_id: &str) -> Result<Job, CoordinatorError> {
        self.inner
            .jobs
            .get(request_id)
            .map(|job| job.clone())
            .ok_or_else(|| CoordinatorError::NotFound(request_id.to_string()))
    }

    /// Jobs not yet settled.
    pub fn active_jobs(&self) -> usize {
        self.inner.jobs.iter().filter(|j| !j.is_settled()).count()
    }

    /// Drop settled jobs last touched more than `retention` ago.
    pub fn prune_settled(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let before = self.inner.jobs.len();
        self.inner
            .jobs
            .retain(|_, job| !(job.is_settled() && job.updated_at < cutoff));
        before.saturating_sub(self.inner.jobs.len())
    }

    /// Periodically prune settled jobs for the life of the process.
    pub fn spawn_reaper(&self, retention: Duration) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        let period = (retention / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let pruned = coordinator.prune_settled(retention);
                if pruned > 0 {
                    tracing::debug!(pruned, "Pruned settled jobs");
                }
                metrics::gauge!("generation_jobs_active").set(coordinator.active_jobs() as f64);
            }
        })
    }
}

impl Inner {
    /// Apply `f` to the job if it still belongs to `epoch`.
    fn update<R>(&self, request_id: &str, epoch: u64, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut job = self.jobs.get_mut(request_id)?;
        if job.epoch != epoch {
            return None;
        }
        let out = f(&mut job);
        job.updated_at = Utc::now();
        Some(out)
    }

    async fn run_job(self: Arc<Self>, request_id: String, epoch: u64, admitted: AuditEntry) {
        // First thing the task does, so it always precedes the outcome entry.
        self.audit.record(admitted).await;

        let Some((request, prompts)) = self.update(&request_id, epoch, |job| {
            job.state = JobState::Running;
            (job.request.clone(), job.prompts.clone())
        }) else {
            return;
        };

        tracing::info!(request_id = %request_id, seed = request.params.seed, "Job running");
        let start = Instant::now();
        let outcome = self.backend.render(&prompts, &request.params).await;

        // Audit first so the outcome entry exists before the job reads as terminal.
        let payload = match outcome {
            Ok(result) => {
                self.audit.record(AuditEntry::completed(&request, &result)).await;
                metrics::counter!("generation_jobs_completed").increment(1);
                tracing::info!(
                    request_id = %request_id,
                    image_hash = %result.image_hash,
                    latency_ms = result.latency_ms,
                    "Job completed"
                );
                self.update(&request_id, epoch, |job| {
                    job.state = JobState::Completed;
                    job.result = Some(result);
                    CallbackPayload::from_job(job)
                })
            }
            Err(error) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                self.audit
                    .record(AuditEntry::failed(&request, &error, latency_ms))
                    .await;
                metrics::counter!("generation_jobs_failed", "kind" => error.kind().to_string())
                    .increment(1);
                tracing::error!(request_id = %request_id, error = %error, "Job failed");
                self.update(&request_id, epoch, |job| {
                    job.state = JobState::Failed;
                    job.error = Some(JobFailure {
                        kind: error.kind(),
                        message: error.to_string(),
                    });
                    CallbackPayload::from_job(job)
                })
            }
        };

        let (Some(payload), Some(url)) = (payload, request.callback_url.as_deref()) else {
            return;
        };
        self.deliver(&request, url, payload, epoch).await;
    }

    /// Settle a job whose task panicked. A panic during generation fails
    /// the job and still notifies the callback; a panic during delivery
    /// ends delivery as exhausted.
    async fn recover_panicked(&self, request_id: &str, epoch: u64) {
        let Some(job) = self.jobs.get(request_id).map(|j| j.clone()) else {
            return;
        };
        if job.epoch != epoch {
            return;
        }

        if !job.state.is_terminal() {
            let error = BackendError::BackendFault("job task panicked".to_string());
            let latency_ms = (Utc::now() - job.created_at).num_milliseconds().max(0) as u64;
            self.audit
                .record(AuditEntry::failed(&job.request, &error, latency_ms))
                .await;
            metrics::counter!("generation_jobs_failed", "kind" => error.kind().to_string())
                .increment(1);
            let payload = self.update(request_id, epoch, |job| {
                job.state = JobState::Failed;
                job.error = Some(JobFailure {
                    kind: error.kind(),
                    message: error.to_string(),
                });
                CallbackPayload::from_job(job)
            });
            if let (Some(payload), Some(url)) = (payload, job.request.callback_url.as_deref()) {
                self.deliver(&job.request, url, payload, epoch).await;
            }
            return;
        }

        if job.delivery == DeliveryState::Pending {
            self.audit
                .record(AuditEntry::callback_outcome(
                    &job.request,
                    false,
                    job.callback_attempts,
                    Some("delivery task panicked".to_string()),
                ))
                .await;
            self.update(request_id, epoch, |job| job.delivery = DeliveryState::Exhausted);
        }
    }

    /// Bounded retry with exponential backoff. Exhaustion is terminal and
    /// only visible through the audit trail and status queries.
    async fn deliver(&self, request: &GenerationRequest, url: &str, payload: CallbackPayload, epoch: u64) {
        let request_id = request.request_id.as_str();
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            if self
                .update(request_id, epoch, |job| job.callback_attempts = attempt)
                .is_none()
            {
                return;
            }

            match self.callbacks.send(url, &payload).await {
                Ok(()) => {
                    tracing::info!(request_id = %request_id, attempt, "Callback delivered");
                    metrics::counter!("callback_deliveries_total", "outcome" => "delivered")
                        .increment(1);
                    self.audit
                        .record(AuditEntry::callback_outcome(request, true, attempt, None))
                        .await;
                    self.update(request_id, epoch, |job| job.delivery = DeliveryState::Delivered);
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %request_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Callback attempt failed"
                    );
                    last_error = Some(e.to_string());
                    if attempt < self.retry.max_attempts {
                        sleep(self.retry.backoff_after(attempt)).await;
                    }
                }
            }
        }

        tracing::error!(
            request_id = %request_id,
            attempts = self.retry.max_attempts,
            "Callback delivery exhausted"
        );
        metrics::counter!("callback_deliveries_total", "outcome" => "exhausted").increment(1);
        self.audit
            .record(AuditEntry::callback_outcome(
                request,
                false,
                self.retry.max_attempts,
                last_error,
            ))
            .await;
        self.update(request_id, epoch, |job| job.delivery = DeliveryState::Exhausted);
    }
}
